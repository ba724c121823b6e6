use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rayon::prelude::*;
use serde_json::Value;
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::CellValue;
use tracing::{debug, warn};

use crate::cost::CostFunction;
use crate::metrics::MetricsExtractor;
use crate::pool::TaskResult;
use crate::serde::{from_yaml_slice, yaml_to_json};
use crate::table::{CumulativeTable, ResultRow, TASK_COLUMN};

/// Column holding the scalar cost.
pub const COST_COLUMN: &str = "cost";
/// Column holding the summed constraint violation.
pub const CONSTRAINT_COLUMN: &str = "constraint";

/// Effect of folding one task result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// A new row was appended and the table rewritten.
    Added,
    /// The task already had a row; nothing changed.
    AlreadyPresent,
}

/// Folds completed tasks into the cumulative table.
///
/// Row preparation runs without locks; inserting and rewriting the table
/// file are serialized by the mutex around the table.
pub struct Aggregator<'a> {
    path: PathBuf,
    table: Mutex<CumulativeTable>,
    input_paths: Vec<String>,
    cost: Option<&'a CostFunction>,
    extractor: &'a dyn MetricsExtractor,
    time_offset: f64,
}

impl<'a> Aggregator<'a> {
    /// Loads (or starts) the table stored at `path`.
    pub fn open(
        path: &Path,
        input_paths: impl IntoIterator<Item = String>,
        cost: Option<&'a CostFunction>,
        extractor: &'a dyn MetricsExtractor,
        time_offset: f64,
    ) -> Result<Self, SweepError> {
        let table = CumulativeTable::load(path)?;
        debug!(path = %path.display(), rows = table.len(), "opened results table");
        Ok(Self {
            path: path.to_path_buf(),
            table: Mutex::new(table),
            input_paths: input_paths.into_iter().collect(),
            cost,
            extractor,
            time_offset,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, CumulativeTable>, SweepError> {
        self.table.lock().map_err(|_| {
            SweepError::AggregationIo(
                ErrorInfo::new("table_lock", "results table lock poisoned")
                    .with_context("path", self.path.display().to_string()),
            )
        })
    }

    /// Task names already recorded in the table.
    pub fn completed_tasks(&self) -> Result<BTreeSet<String>, SweepError> {
        Ok(self.lock()?.task_names())
    }

    /// Copy of the current table.
    pub fn snapshot(&self) -> Result<CumulativeTable, SweepError> {
        Ok(self.lock()?.clone())
    }

    /// Location of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folds one completed task and rewrites the table file.
    pub fn fold(&self, result: &TaskResult) -> Result<FoldOutcome, SweepError> {
        let task = result.task_name();
        if self.lock()?.contains(&task) {
            return Ok(FoldOutcome::AlreadyPresent);
        }
        let row = self.build_row(result)?;
        self.commit(row)
    }

    /// Folds a batch: rows are prepared in parallel, writes are serialized.
    ///
    /// The returned outcomes are aligned with `results`.
    pub fn fold_batch(&self, results: &[TaskResult]) -> Vec<Result<FoldOutcome, SweepError>> {
        results.par_iter().map(|result| self.fold(result)).collect()
    }

    fn commit(&self, row: ResultRow) -> Result<FoldOutcome, SweepError> {
        let mut table = self.lock()?;
        let task = row.task.clone();
        if !table.insert(row) {
            return Ok(FoldOutcome::AlreadyPresent);
        }
        table.save(&self.path)?;
        debug!(task = %task, rows = table.len(), "recorded task");
        Ok(FoldOutcome::Added)
    }

    fn build_row(&self, result: &TaskResult) -> Result<ResultRow, SweepError> {
        let task = result.task_name();
        let params = read_params(&result.task_path)?;
        let mut row = ResultRow::new(task.clone());
        for path in self.input_paths.iter().filter(|path| *path != TASK_COLUMN) {
            if let Some(cell) = params.get(path).and_then(CellValue::from_json) {
                row.set(path.clone(), cell);
            }
        }

        let kpis = self
            .extractor
            .extract(&result.recording, &result.results_dir, self.time_offset)
            .map_err(|err| match err {
                SweepError::TaskExecution(info) => {
                    SweepError::TaskExecution(info.with_context("task", task.clone()))
                }
                other => SweepError::TaskExecution(
                    ErrorInfo::new("kpi_extract", other.to_string())
                        .with_context("task", task.clone()),
                ),
            })?;
        self.extractor.persist(&kpis, &result.results_dir)?;

        if let Some(cost) = self.cost {
            match cost.evaluate(&kpis) {
                Ok(outcome) => {
                    if let Some(value) = outcome.cost {
                        row.set(COST_COLUMN, value);
                    }
                    if let Some(value) = outcome.constraint {
                        row.set(CONSTRAINT_COLUMN, value);
                    }
                }
                Err(err) => {
                    warn!(task = %task, error = %err, "cost not evaluated, leaving cells empty");
                }
            }
        }

        for (name, value) in kpis {
            if name == TASK_COLUMN || row.cells.contains_key(&name) {
                debug!(task = %task, kpi = %name, "KPI shadowed by an existing column");
                continue;
            }
            row.cells.insert(name, value);
        }
        Ok(row)
    }
}

fn read_params(task_path: &Path) -> Result<serde_json::Map<String, Value>, SweepError> {
    let descriptor_error = |code: &str, message: String| {
        SweepError::TaskExecution(
            ErrorInfo::new(code, message).with_context("path", task_path.display().to_string()),
        )
    };
    let bytes =
        fs::read(task_path).map_err(|err| descriptor_error("descriptor_read", err.to_string()))?;
    let yaml: serde_yaml::Value = from_yaml_slice(&bytes)
        .map_err(|err| descriptor_error("descriptor_parse", err.info().message.clone()))?;
    let document = yaml_to_json(&yaml)
        .map_err(|err| descriptor_error("descriptor_parse", err.info().message.clone()))?;
    match document.get("execute").and_then(|execute| execute.get("params")) {
        Some(Value::Object(params)) => Ok(params.clone()),
        _ => Err(descriptor_error(
            "descriptor_params",
            "descriptor lacks execute.params".to_string(),
        )),
    }
}
