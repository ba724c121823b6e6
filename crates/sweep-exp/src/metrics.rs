use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::{CellValue, KpiMap};

use crate::serde::{from_json_slice, from_yaml_slice, to_yaml_string, yaml_to_json};

/// File name used when KPIs are persisted next to a task's results.
pub const KPI_FILE: &str = "kpis.yaml";

fn task_error(code: &str, path: &Path, err: impl ToString) -> SweepError {
    SweepError::TaskExecution(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Computes the KPI mapping of one completed simulation.
pub trait MetricsExtractor: Send + Sync {
    /// Reads the recording and result artefacts, skipping the first
    /// `time_offset` seconds of the recording.
    fn extract(
        &self,
        recording: &Path,
        results_dir: &Path,
        time_offset: f64,
    ) -> Result<KpiMap, SweepError>;

    /// Stores the KPI mapping as `kpis.yaml` under `results_dir`.
    fn persist(&self, kpis: &KpiMap, results_dir: &Path) -> Result<PathBuf, SweepError> {
        fs::create_dir_all(results_dir)
            .map_err(|err| task_error("kpi_dir_create", results_dir, err))?;
        let target = results_dir.join(KPI_FILE);
        let text = to_yaml_string(kpis)?;
        fs::write(&target, text).map_err(|err| task_error("kpi_write", &target, err))?;
        Ok(target)
    }
}

/// Extractor reading a flat KPI mapping written by the simulator itself.
///
/// Looks for `kpis.json`, then `kpis.yaml`/`kpis.yml`, first in the results
/// directory and then in the recording directory. Nested values are kept as
/// their JSON text and `null` entries are dropped.
#[derive(Debug, Clone, Default)]
pub struct FileKpiExtractor;

const CANDIDATES: [&str; 3] = ["kpis.json", "kpis.yaml", "kpis.yml"];

impl FileKpiExtractor {
    fn locate(recording: &Path, results_dir: &Path) -> Option<PathBuf> {
        [results_dir, recording]
            .iter()
            .flat_map(|dir| CANDIDATES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }
}

impl MetricsExtractor for FileKpiExtractor {
    fn extract(
        &self,
        recording: &Path,
        results_dir: &Path,
        _time_offset: f64,
    ) -> Result<KpiMap, SweepError> {
        let path = Self::locate(recording, results_dir).ok_or_else(|| {
            SweepError::TaskExecution(
                ErrorInfo::new("kpi_missing", "no KPI file produced by the simulator")
                    .with_context("results_dir", results_dir.display().to_string()),
            )
        })?;
        let bytes = fs::read(&path).map_err(|err| task_error("kpi_read", &path, err))?;
        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        let parsed: Result<BTreeMap<String, Value>, SweepError> = if is_json {
            from_json_slice(&bytes)
        } else {
            from_yaml_slice::<BTreeMap<String, serde_yaml::Value>>(&bytes).and_then(|map| {
                map.into_iter()
                    .map(|(key, value)| yaml_to_json(&value).map(|value| (key, value)))
                    .collect()
            })
        };
        let raw = parsed.map_err(|err| task_error("kpi_parse", &path, err.info().message.clone()))?;
        Ok(raw
            .iter()
            .filter_map(|(name, value)| {
                CellValue::from_json(value).map(|cell| (name.clone(), cell))
            })
            .collect())
    }
}
