use std::fs;
use std::path::Path;

use serde_json::json;
use sweep_core::{CellValue, KpiMap, SweepError};
use sweep_exp::{CostFunction, CostOutcome};

fn kpis(entries: &[(&str, CellValue)]) -> KpiMap {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[test]
fn speed_minus_error_scores_one_and_a_half() {
    let cost = CostFunction::from_formula("score", "speed - error").expect("formula");
    let outcome = cost
        .evaluate(&kpis(&[
            ("speed", CellValue::Float(2.0)),
            ("error", CellValue::Float(0.5)),
        ]))
        .expect("evaluate");
    assert_eq!(
        outcome,
        CostOutcome {
            cost: Some(1.5),
            constraint: None
        }
    );
}

#[test]
fn weighted_terms_add_to_the_formula() {
    let fragment = json!({
        "formula": "2 * max(speed, 1)",
        "terms": {"error": -10.0, "steps": 0.5},
    });
    let cost = CostFunction::from_config(Some(&fragment), None, Path::new("."))
        .expect("config")
        .expect("cost present");
    let outcome = cost
        .evaluate(&kpis(&[
            ("speed", CellValue::Float(3.0)),
            ("error", CellValue::Float(0.25)),
            ("steps", CellValue::Int(4)),
        ]))
        .expect("evaluate");
    assert_eq!(outcome.cost, Some(6.0 - 2.5 + 2.0));
}

#[test]
fn constraints_sum_boolean_and_scalar_violations() {
    let fragment = json!({
        "terms": {"speed": 1.0},
        "constraints": [
            "stable == true",
            {"name": "overshoot", "formula": "overshoot - 0.1"},
        ],
    });
    let extra = json!([{"formula": "abs(error) <= 0.2"}]);
    let cost = CostFunction::from_config(Some(&fragment), Some(&extra), Path::new("."))
        .expect("config")
        .expect("cost present");
    assert_eq!(cost.constraints.len(), 3);
    assert_eq!(cost.constraints[1].name, "overshoot");

    let passing = cost
        .evaluate(&kpis(&[
            ("speed", CellValue::Float(1.0)),
            ("stable", CellValue::Bool(true)),
            ("overshoot", CellValue::Float(0.05)),
            ("error", CellValue::Float(-0.1)),
        ]))
        .expect("evaluate");
    assert_eq!(passing.constraint, Some(0.0));

    let failing = cost
        .evaluate(&kpis(&[
            ("speed", CellValue::Float(1.0)),
            ("stable", CellValue::Bool(false)),
            ("overshoot", CellValue::Float(0.35)),
            ("error", CellValue::Float(-0.5)),
        ]))
        .expect("evaluate");
    let total = failing.constraint.expect("constraint");
    assert!((total - 2.25).abs() < 1e-12, "total {total}");
}

#[test]
fn constraints_without_cost_leave_cost_absent() {
    let constraints = json!(["err < 1"]);
    let cost = CostFunction::from_config(None, Some(&constraints), Path::new("."))
        .expect("config")
        .expect("constraints present");
    let outcome = cost
        .evaluate(&kpis(&[("err", CellValue::Float(2.0))]))
        .expect("evaluate");
    assert_eq!(outcome.cost, None);
    assert_eq!(outcome.constraint, Some(1.0));
    assert!(CostFunction::from_config(None, None, Path::new("."))
        .expect("nothing configured")
        .is_none());
}

#[test]
fn cost_and_constraints_load_from_yaml_files() {
    let temp = tempfile::tempdir().expect("tmp dir");
    fs::write(temp.path().join("cost.yml"), "formula: speed * 2\n").expect("write cost");
    fs::write(temp.path().join("limits.yaml"), "- speed < 10\n").expect("write limits");
    let cost = CostFunction::from_config(
        Some(&json!("cost.yml")),
        Some(&json!("limits.yaml")),
        temp.path(),
    )
    .expect("config")
    .expect("cost present");
    let outcome = cost
        .evaluate(&kpis(&[("speed", CellValue::Int(12))]))
        .expect("evaluate");
    assert_eq!(outcome.cost, Some(24.0));
    assert_eq!(outcome.constraint, Some(1.0));
}

#[test]
fn missing_kpi_is_an_evaluation_error() {
    let cost = CostFunction::from_formula("score", "speed - error").expect("formula");
    match cost.evaluate(&kpis(&[("speed", CellValue::Float(1.0))])) {
        Err(SweepError::InvalidCostSpec(info)) => {
            assert_eq!(info.code, "cost_kpi_missing");
            assert_eq!(info.context.get("kpi").map(String::as_str), Some("error"));
        }
        other => panic!("expected missing KPI error, got {other:?}"),
    }
}

#[test]
fn malformed_cost_configuration_is_rejected_at_load() {
    let base = Path::new(".");
    let cases = [
        json!(42),
        json!({}),
        json!({"formula": "speed +"}),
        json!({"formula": "speed", "weights": {}}),
        json!("cost.txt"),
        json!("missing.yaml"),
    ];
    for fragment in cases {
        match CostFunction::from_config(Some(&fragment), None, base) {
            Err(SweepError::InvalidCostSpec(_)) => {}
            other => panic!("expected InvalidCostSpec for {fragment}, got {other:?}"),
        }
    }
    match CostFunction::from_config(None, Some(&json!({"formula": 3})), base) {
        Err(SweepError::InvalidCostSpec(_)) => {}
        other => panic!("expected InvalidCostSpec, got {other:?}"),
    }
}
