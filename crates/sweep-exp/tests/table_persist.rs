use std::fs;

use sweep_core::{CellValue, SweepError};
use sweep_exp::{CumulativeTable, ResultRow};

fn sample_table() -> CumulativeTable {
    let mut table = CumulativeTable::new();
    assert!(table.insert(
        ResultRow::new("task_0")
            .with("controller.gain", 1.0)
            .with("steps", 100_i64)
            .with("stable", true)
            .with("solver", "rk4"),
    ));
    assert!(table.insert(
        ResultRow::new("task_1")
            .with("controller.gain", 2.0)
            .with("cost", 0.8),
    ));
    table
}

#[test]
fn saved_table_reloads_with_cell_types_intact() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("results.json");
    let table = sample_table();
    table.save(&path).expect("save");

    let loaded = CumulativeTable::load(&path).expect("load");
    assert_eq!(loaded.len(), 2);
    let first = loaded.row("task_0").expect("task_0");
    assert_eq!(first.cells["steps"], CellValue::Int(100));
    assert_eq!(first.cells["stable"], CellValue::Bool(true));
    assert_eq!(first.cells["controller.gain"], CellValue::Float(1.0));
    assert_eq!(first.cells["solver"], CellValue::Text("rk4".to_string()));
    assert!(!first.cells.contains_key("cost"));
    let second = loaded.row("task_1").expect("task_1");
    assert_eq!(second.cells["cost"], CellValue::Float(0.8));
    assert_eq!(loaded.rows()[0].task, "task_0");
    assert_eq!(loaded.columns()[0], "task");
}

#[test]
fn on_disk_layout_is_column_oriented() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("results.json");
    sample_table().save(&path).expect("save");
    let document: serde_json::Value =
        serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
    assert_eq!(document["task"]["0"], "task_0");
    assert_eq!(document["task"]["1"], "task_1");
    assert_eq!(document["cost"]["1"], 0.8);
    assert!(document["cost"].get("0").is_none());
    assert!(fs::read_dir(temp.path())
        .expect("list")
        .all(|entry| !entry.expect("entry").file_name().to_string_lossy().contains(".tmp")));
}

#[test]
fn duplicate_tasks_are_refused() {
    let mut table = sample_table();
    assert!(!table.insert(ResultRow::new("task_0").with("cost", 5.0)));
    assert_eq!(table.len(), 2);
    assert!(table.row("task_0").expect("row").cells.get("cost").is_none());
}

#[test]
fn columns_grow_in_order_of_first_appearance() {
    let table = sample_table();
    assert_eq!(
        table.columns(),
        ["task", "controller.gain", "solver", "stable", "steps", "cost"]
    );
}

#[test]
fn missing_file_loads_empty_and_corrupt_file_fails() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let absent = CumulativeTable::load(&temp.path().join("none.json")).expect("absent");
    assert!(absent.is_empty());

    let corrupt = temp.path().join("corrupt.json");
    fs::write(&corrupt, "{\"task\": [1, 2").expect("write");
    assert!(matches!(
        CumulativeTable::load(&corrupt),
        Err(SweepError::AggregationIo(_))
    ));

    let orphan = temp.path().join("orphan.json");
    fs::write(&orphan, r#"{"task": {"0": "task_0"}, "cost": {"1": 0.5}}"#).expect("write");
    assert!(matches!(
        CumulativeTable::load(&orphan),
        Err(SweepError::AggregationIo(_))
    ));
}

#[test]
fn non_finite_values_reload_as_absent() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("results.json");
    let mut table = CumulativeTable::new();
    table.insert(ResultRow::new("task_0").with("cost", f64::NAN).with("err", 0.1));
    table.save(&path).expect("save");
    let loaded = CumulativeTable::load(&path).expect("load");
    let row = loaded.row("task_0").expect("row");
    assert!(!row.cells.contains_key("cost"));
    assert_eq!(row.cells["err"], CellValue::Float(0.1));
}

#[test]
fn csv_export_leaves_absent_cells_blank() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let path = temp.path().join("results.csv");
    sample_table().export_csv(&path).expect("export");
    let text = fs::read_to_string(&path).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "task,controller.gain,solver,stable,steps,cost");
    assert_eq!(lines[1], "task_0,1,rk4,true,100,");
    assert_eq!(lines[2], "task_1,2,,,,0.8");
}
