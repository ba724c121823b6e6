use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde_json::{Map, Value};
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::CellValue;

use crate::serde::to_canonical_json_bytes;

/// Name of the column identifying the task of each row.
pub const TASK_COLUMN: &str = "task";

fn table_error(code: &str, path: &Path, err: impl ToString) -> SweepError {
    SweepError::AggregationIo(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// One completed task: its parameters, KPIs and scores.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRow {
    /// Descriptor name, unique within a table.
    pub task: String,
    /// Cells keyed by column name; absent cells are simply missing.
    pub cells: BTreeMap<String, CellValue>,
}

impl ResultRow {
    /// Creates an empty row for `task`.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Sets one cell, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Builder form of [`ResultRow::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.set(column, value);
        self
    }
}

/// Cumulative results table keyed by task name.
///
/// Columns only ever grow. Rows keep insertion order and a task appears at
/// most once. On disk the table is a column-oriented JSON document
/// `{column: {"<row index>": value}}` with absent cells omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeTable {
    columns: Vec<String>,
    rows: Vec<ResultRow>,
    tasks: BTreeSet<String>,
}

impl Default for CumulativeTable {
    fn default() -> Self {
        Self {
            columns: vec![TASK_COLUMN.to_string()],
            rows: Vec::new(),
            tasks: BTreeSet::new(),
        }
    }
}

impl CumulativeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a table; a missing file yields an empty table.
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(table_error("table_read", path, err)),
        };
        let document: BTreeMap<String, Map<String, Value>> =
            serde_json::from_slice(&bytes).map_err(|err| table_error("table_parse", path, err))?;

        let mut slots: BTreeMap<usize, ResultRow> = BTreeMap::new();
        for (column, cells) in &document {
            for (index, value) in cells {
                let index: usize = index.parse().map_err(|_| {
                    table_error("table_index", path, format!("bad row index `{index}`"))
                })?;
                let row = slots.entry(index).or_default();
                if column == TASK_COLUMN {
                    row.task = value
                        .as_str()
                        .ok_or_else(|| table_error("table_task", path, "task cell is not text"))?
                        .to_string();
                } else if let Some(cell) = CellValue::from_json(value) {
                    row.cells.insert(column.clone(), cell);
                }
            }
        }

        let mut table = Self::new();
        for column in document.keys().filter(|column| *column != TASK_COLUMN) {
            table.columns.push(column.clone());
        }
        for (index, row) in slots {
            if row.task.is_empty() {
                return Err(table_error(
                    "table_task",
                    path,
                    format!("row {index} has no task name"),
                ));
            }
            if !table.tasks.insert(row.task.clone()) {
                return Err(table_error(
                    "table_duplicate",
                    path,
                    format!("task `{}` appears twice", row.task),
                ));
            }
            table.rows.push(row);
        }
        Ok(table)
    }

    /// Writes the whole table atomically (temporary file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), SweepError> {
        let bytes = to_canonical_json_bytes(&self.to_json())
            .map_err(|err| table_error("table_encode", path, err.info().message.clone()))?;
        atomic_write(path, &bytes).map_err(|err| table_error("table_write", path, err))
    }

    fn to_json(&self) -> Value {
        let mut document = Map::new();
        for column in &self.columns {
            let mut cells = Map::new();
            for (index, row) in self.rows.iter().enumerate() {
                let value = if column == TASK_COLUMN {
                    Some(Value::String(row.task.clone()))
                } else {
                    row.cells.get(column).and_then(|cell| serde_json::to_value(cell).ok())
                };
                if let Some(value) = value {
                    cells.insert(index.to_string(), value);
                }
            }
            document.insert(column.clone(), Value::Object(cells));
        }
        Value::Object(document)
    }

    /// Appends `row` unless its task is already present. Returns true when added.
    pub fn insert(&mut self, row: ResultRow) -> bool {
        if !self.tasks.insert(row.task.clone()) {
            return false;
        }
        for column in row.cells.keys() {
            if !self.columns.iter().any(|existing| existing == column) {
                self.columns.push(column.clone());
            }
        }
        self.rows.push(row);
        true
    }

    /// Returns true when `task` already has a row.
    pub fn contains(&self, task: &str) -> bool {
        self.tasks.contains(task)
    }

    /// Recorded task names.
    pub fn task_names(&self) -> BTreeSet<String> {
        self.tasks.clone()
    }

    /// Column names, `task` first.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Row for `task`, if recorded.
    pub fn row(&self, task: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|row| row.task == task)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no row is recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as CSV; absent cells become empty fields.
    pub fn export_csv(&self, path: &Path) -> Result<(), SweepError> {
        let mut writer =
            csv::Writer::from_path(path).map_err(|err| table_error("csv_open", path, err))?;
        writer
            .write_record(&self.columns)
            .map_err(|err| table_error("csv_write", path, err))?;
        for row in &self.rows {
            let record = self.columns.iter().map(|column| {
                if column == TASK_COLUMN {
                    row.task.clone()
                } else {
                    row.cells
                        .get(column)
                        .map(ToString::to_string)
                        .unwrap_or_default()
                }
            });
            writer
                .write_record(record)
                .map_err(|err| table_error("csv_write", path, err))?;
        }
        writer.flush().map_err(|err| table_error("csv_flush", path, err))
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    let temp = parent.join(format!(".{name}.tmp.{}", std::process::id()));
    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp, path)
}
