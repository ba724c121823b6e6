use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use fasteval::{
    BinaryOp, Compiler, Evaler, ExprPair, Expression, Instruction, Parser, Slab, StdFunc,
    Value as Operand,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::{CellValue, KpiMap};

use crate::config::resolve_fragment;

fn cost_error(code: &str, message: impl Into<String>) -> SweepError {
    SweepError::InvalidCostSpec(ErrorInfo::new(code, message))
}

/// Names resolved by the formula namespace rather than by the KPI mapping.
const RESERVED: [&str; 3] = ["sqrt", "true", "false"];

/// How the top level of a formula is read back as a [`Scalar`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    /// Arithmetic result.
    Numeric,
    /// Top-level comparison or logical operator; non-zero means true.
    Comparison,
    /// A lone name, boolean when the KPI (or literal) it names is.
    Flag(String),
}

impl Shape {
    fn of(expression: &Expression) -> Self {
        let compares = expression.pairs.iter().any(|ExprPair(op, _)| {
            matches!(
                op,
                BinaryOp::ELT
                    | BinaryOp::ELTE
                    | BinaryOp::EEQ
                    | BinaryOp::ENE
                    | BinaryOp::EGTE
                    | BinaryOp::EGT
                    | BinaryOp::EOR
                    | BinaryOp::EAND
            )
        });
        if compares {
            return Shape::Comparison;
        }
        match &expression.first {
            Operand::EStdFunc(StdFunc::EVar(name)) if expression.pairs.is_empty() => {
                Shape::Flag(name.clone())
            }
            _ => Shape::Numeric,
        }
    }
}

struct Compiled {
    slab: Slab,
    instruction: Instruction,
}

/// Compiled formula evaluated against a KPI mapping.
///
/// Formulas use the `fasteval` grammar: arithmetic, `^`, `%`, comparisons,
/// `&&`/`||`, the built-ins `abs`, `min`, `max`, `round` and friends, plus
/// `sqrt`, `true` and `false`. Every other name is a KPI.
#[derive(Clone)]
pub struct Expr {
    source: String,
    shape: Shape,
    kpis: Vec<String>,
    compiled: Arc<Compiled>,
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expr")
            .field("source", &self.source)
            .field("kpis", &self.kpis)
            .finish()
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Result of evaluating an [`Expr`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Numeric result.
    Number(f64),
    /// Boolean result.
    Bool(bool),
}

impl Scalar {
    /// Numeric view; booleans map to 0/1.
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Number(value) => value,
            Scalar::Bool(flag) => {
                if flag {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl Expr {
    /// Parses and compiles an infix formula such as `speed - 0.5 * abs(error)`.
    pub fn parse(formula: &str) -> Result<Self, SweepError> {
        if formula.trim().is_empty() {
            return Err(cost_error("cost_empty_formula", "formula is empty"));
        }
        let mut slab = Slab::new();
        let root = Parser::new().parse(formula, &mut slab.ps).map_err(|err| {
            SweepError::InvalidCostSpec(
                ErrorInfo::new("cost_parse", err.to_string()).with_context("formula", formula),
            )
        })?;
        let expression = root.from(&slab.ps);
        let shape = Shape::of(expression);
        let instruction = expression.compile(&slab.ps, &mut slab.cs);
        let kpis = instruction
            .var_names(&slab)
            .into_iter()
            .filter(|name| !RESERVED.contains(&name.as_str()))
            .collect();
        // Unknown functions only fail when called, so evaluate once with every name bound.
        let mut dry_run = |name: &str, args: Vec<f64>| -> Option<f64> {
            match (name, args.len()) {
                ("sqrt", 1) | (_, 0) => Some(1.0),
                _ => None,
            }
        };
        instruction.eval(&slab, &mut dry_run).map_err(|err| {
            SweepError::InvalidCostSpec(
                ErrorInfo::new("cost_function", err.to_string()).with_context("formula", formula),
            )
        })?;
        Ok(Self {
            source: formula.to_string(),
            shape,
            kpis,
            compiled: Arc::new(Compiled { slab, instruction }),
        })
    }

    /// Formula text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every KPI referenced by the expression, sorted.
    pub fn kpi_names(&self) -> Vec<&str> {
        self.kpis.iter().map(String::as_str).collect()
    }

    /// Evaluates the expression. Missing or non-numeric KPIs are errors.
    pub fn evaluate(&self, kpis: &KpiMap) -> Result<Scalar, SweepError> {
        let mut bindings: BTreeMap<&str, f64> = BTreeMap::new();
        for name in &self.kpis {
            let cell = kpis.get(name).ok_or_else(|| {
                SweepError::InvalidCostSpec(
                    ErrorInfo::new("cost_kpi_missing", "KPI referenced by cost is missing")
                        .with_context("kpi", name.clone()),
                )
            })?;
            let value = cell.as_f64().ok_or_else(|| {
                SweepError::InvalidCostSpec(
                    ErrorInfo::new("cost_kpi_type", "KPI is not numeric")
                        .with_context("kpi", name.clone()),
                )
            })?;
            bindings.insert(name.as_str(), value);
        }
        let mut namespace = |name: &str, args: Vec<f64>| -> Option<f64> {
            match (name, args.as_slice()) {
                ("sqrt", [value]) => Some(value.sqrt()),
                ("true", []) => Some(1.0),
                ("false", []) => Some(0.0),
                (_, []) => bindings.get(name).copied(),
                _ => None,
            }
        };
        let compiled = &self.compiled;
        let value = compiled
            .instruction
            .eval(&compiled.slab, &mut namespace)
            .map_err(|err| {
                SweepError::InvalidCostSpec(
                    ErrorInfo::new("cost_eval", err.to_string())
                        .with_context("formula", self.source.clone()),
                )
            })?;
        let boolean = match &self.shape {
            Shape::Numeric => false,
            Shape::Comparison => true,
            Shape::Flag(name) => {
                matches!(name.as_str(), "true" | "false")
                    || matches!(kpis.get(name), Some(CellValue::Bool(_)))
            }
        };
        Ok(if boolean {
            Scalar::Bool(value != 0.0)
        } else {
            Scalar::Number(value)
        })
    }
}

/// Named constraint expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Label used in diagnostics.
    pub name: String,
    /// Boolean constraints pass when true; scalar ones pass when `<= 0`.
    pub expr: Expr,
}

impl Constraint {
    /// Violation measure: 0/1 for boolean constraints, `max(0, g)` otherwise.
    pub fn violation(&self, kpis: &KpiMap) -> Result<f64, SweepError> {
        Ok(match self.expr.evaluate(kpis)? {
            Scalar::Bool(passed) => {
                if passed {
                    0.0
                } else {
                    1.0
                }
            }
            Scalar::Number(value) => value.max(0.0),
        })
    }
}

/// Cost and constraint values computed for one task.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostOutcome {
    /// Scalar cost, absent when only constraints are configured.
    pub cost: Option<f64>,
    /// Summed constraint violation, absent when no constraint is configured.
    pub constraint: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CostDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    formula: Option<String>,
    #[serde(default)]
    terms: BTreeMap<String, f64>,
    #[serde(default)]
    constraints: Vec<ConstraintDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConstraintDoc {
    Formula(String),
    Named {
        #[serde(default)]
        name: Option<String>,
        formula: String,
    },
}

/// Configurable cost function with optional constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct CostFunction {
    /// Display name of the cost function.
    pub name: String,
    /// Cost expression; `None` when only constraints were configured.
    pub cost: Option<Expr>,
    /// Constraint expressions, summed into a single violation measure.
    pub constraints: Vec<Constraint>,
}

impl CostFunction {
    /// Builds a cost function from the `cost_fcn` and `constraints` fragments.
    ///
    /// Each fragment is an inline value or a `.yml`/`.yaml` path relative to
    /// `base_dir`. Constraints are appended to the ones declared inside the
    /// cost fragment. Returns `Ok(None)` when both fragments are absent.
    pub fn from_config(
        cost_fcn: Option<&Value>,
        constraints: Option<&Value>,
        base_dir: &Path,
    ) -> Result<Option<Self>, SweepError> {
        if cost_fcn.is_none() && constraints.is_none() {
            return Ok(None);
        }
        let mut function = match cost_fcn {
            Some(fragment) => {
                let value = resolve_fragment(fragment, base_dir, SweepError::InvalidCostSpec)?;
                if !value.is_object() {
                    return Err(cost_error("cost_shape", "cost_fcn must be a mapping"));
                }
                let doc: CostDoc = serde_json::from_value(value)
                    .map_err(|err| cost_error("cost_decode", err.to_string()))?;
                Self::from_doc(doc)?
            }
            None => Self {
                name: "constraints".to_string(),
                cost: None,
                constraints: Vec::new(),
            },
        };
        if let Some(fragment) = constraints {
            let value = resolve_fragment(fragment, base_dir, SweepError::InvalidCostSpec)?;
            let docs: Vec<ConstraintDoc> = serde_json::from_value(value)
                .map_err(|err| cost_error("constraints_decode", err.to_string()))?;
            function.add_constraints(docs)?;
        }
        Ok(Some(function))
    }

    /// Builds a cost function from a single formula.
    pub fn from_formula(name: impl Into<String>, formula: &str) -> Result<Self, SweepError> {
        Ok(Self {
            name: name.into(),
            cost: Some(Expr::parse(formula)?),
            constraints: Vec::new(),
        })
    }

    /// Appends a constraint formula.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        formula: &str,
    ) -> Result<(), SweepError> {
        self.constraints.push(Constraint {
            name: name.into(),
            expr: Expr::parse(formula)?,
        });
        Ok(())
    }

    fn from_doc(doc: CostDoc) -> Result<Self, SweepError> {
        let mut parts: Vec<String> = doc
            .formula
            .iter()
            .map(|formula| format!("({formula})"))
            .collect();
        parts.extend(
            doc.terms
                .iter()
                .map(|(kpi, weight)| format!("({weight}) * {kpi}")),
        );
        if parts.is_empty() {
            return Err(cost_error(
                "cost_empty",
                "cost_fcn needs a formula or weighted terms",
            ));
        }
        let mut function = Self {
            name: doc.name.unwrap_or_else(|| "cost".to_string()),
            cost: Some(Expr::parse(&parts.join(" + "))?),
            constraints: Vec::new(),
        };
        function.add_constraints(doc.constraints)?;
        Ok(function)
    }

    fn add_constraints(&mut self, docs: Vec<ConstraintDoc>) -> Result<(), SweepError> {
        for doc in docs {
            let (name, formula) = match doc {
                ConstraintDoc::Formula(formula) => (None, formula),
                ConstraintDoc::Named { name, formula } => (name, formula),
            };
            let name = name.unwrap_or_else(|| formula.clone());
            self.add_constraint(name, &formula)?;
        }
        Ok(())
    }

    /// Evaluates cost and summed constraint violation over a KPI mapping.
    pub fn evaluate(&self, kpis: &KpiMap) -> Result<CostOutcome, SweepError> {
        let cost = match &self.cost {
            Some(expr) => Some(expr.evaluate(kpis)?.as_f64()),
            None => None,
        };
        let constraint = if self.constraints.is_empty() {
            None
        } else {
            let mut total = 0.0;
            for constraint in &self.constraints {
                total += constraint.violation(kpis)?;
            }
            Some(total)
        };
        Ok(CostOutcome { cost, constraint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kpis(entries: &[(&str, CellValue)]) -> KpiMap {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn precedence_and_unary_minus() {
        let expr = Expr::parse("-a + b * 2 - (c - 1) / 2").expect("parse");
        let values = kpis(&[
            ("a", CellValue::Float(1.0)),
            ("b", CellValue::Int(3)),
            ("c", CellValue::Float(5.0)),
        ]);
        assert_eq!(expr.evaluate(&values).expect("eval"), Scalar::Number(3.0));
        assert_eq!(expr.kpi_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn top_level_comparison_reads_as_boolean() {
        let values = kpis(&[("err", CellValue::Float(0.3)), ("ok", CellValue::Bool(true))]);
        let within = Expr::parse("err * 2 <= 1").expect("parse");
        assert_eq!(within.evaluate(&values).expect("eval"), Scalar::Bool(true));
        let nested = Expr::parse("(err < 1) + 2").expect("parse");
        assert_eq!(nested.evaluate(&values).expect("eval"), Scalar::Number(3.0));
        let flag = Expr::parse("ok").expect("parse");
        assert_eq!(flag.evaluate(&values).expect("eval"), Scalar::Bool(true));
        let literal = Expr::parse("ok == true").expect("parse");
        assert_eq!(literal.kpi_names(), vec!["ok"]);
        assert_eq!(literal.evaluate(&values).expect("eval"), Scalar::Bool(true));
    }

    #[test]
    fn sqrt_and_builtins_are_not_kpis() {
        let expr = Expr::parse("sqrt(x) + max(y, 1) + abs(-2)").expect("parse");
        assert_eq!(expr.kpi_names(), vec!["x", "y"]);
        let values = kpis(&[("x", CellValue::Float(9.0)), ("y", CellValue::Int(0))]);
        assert_eq!(expr.evaluate(&values).expect("eval"), Scalar::Number(6.0));
    }

    #[test]
    fn text_kpi_is_a_type_error() {
        let expr = Expr::parse("label + 1").expect("parse");
        match expr.evaluate(&kpis(&[("label", CellValue::Text("fast".into()))])) {
            Err(SweepError::InvalidCostSpec(info)) => assert_eq!(info.code, "cost_kpi_type"),
            other => panic!("expected type error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_formulas_are_rejected_at_parse_time() {
        for formula in ["", "  ", "a +", "(a", "a $ b", "a b", "foo(a)", "sqrt(a, b)"] {
            let err = Expr::parse(formula).expect_err(formula);
            assert!(matches!(err, SweepError::InvalidCostSpec(_)), "{formula}");
        }
    }
}
