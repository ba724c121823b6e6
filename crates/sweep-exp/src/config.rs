use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use sweep_core::errors::{ErrorInfo, SweepError};

use crate::cost::CostFunction;
use crate::grid::{Assignment, ParameterSpec, SamplingMode};
use crate::serde::yaml_to_json;
use crate::template::InputMap;

fn spec_error(code: &str, message: impl Into<String>) -> SweepError {
    SweepError::invalid_spec(code, message)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDoc {
    parameters: BTreeMap<String, Value>,
    input_map: BTreeMap<String, Value>,
    #[serde(default)]
    fixed_params: Option<Value>,
    #[serde(default)]
    cost_fcn: Option<Value>,
    #[serde(default)]
    constraints: Option<Value>,
    #[serde(default)]
    use_monte_carlo: bool,
    #[serde(default)]
    time_offset: f64,
    #[serde(default)]
    reference: Option<Assignment>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default = "default_max_num_processes")]
    max_num_processes: usize,
}

fn default_max_num_processes() -> usize {
    2
}

/// Validated sweep configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Parameters to sweep.
    pub parameters: ParameterSpec,
    /// Task-parameter paths fed from the assignment.
    pub input_map: InputMap,
    /// Task parameters written verbatim into every descriptor.
    pub fixed_params: BTreeMap<String, Value>,
    /// Optional cost function and constraints.
    pub cost: Option<CostFunction>,
    /// Grid or Monte Carlo enumeration.
    pub mode: SamplingMode,
    /// Seconds of the recording skipped before KPIs are computed.
    pub time_offset: f64,
    /// Assignment run once as the `reference` task.
    pub reference: Option<Assignment>,
    /// Master seed for Monte Carlo draws.
    pub seed: Option<u64>,
    /// Default worker count.
    pub max_num_processes: usize,
    /// Directory relative file references were resolved against.
    pub base_dir: PathBuf,
}

impl SweepConfig {
    /// Parses and validates a YAML configuration.
    pub fn from_yaml_str(text: &str, base_dir: &Path) -> Result<Self, SweepError> {
        let doc: ConfigDoc = serde_yaml::from_str(text).map_err(|err| {
            SweepError::InvalidSpec(
                ErrorInfo::new("config_parse", err.to_string())
                    .with_context("base_dir", base_dir.display().to_string()),
            )
        })?;
        Self::from_doc(doc, base_dir)
    }

    fn from_doc(doc: ConfigDoc, base_dir: &Path) -> Result<Self, SweepError> {
        let parameters = ParameterSpec::from_raw(&doc.parameters)?;
        let input_map = InputMap::from_raw(&doc.input_map, parameters.names())?;
        if !doc.time_offset.is_finite() || doc.time_offset < 0.0 {
            return Err(SweepError::InvalidSpec(
                ErrorInfo::new("time_offset", "time_offset must be a non-negative number")
                    .with_context("time_offset", doc.time_offset.to_string()),
            ));
        }
        if doc.max_num_processes == 0 {
            return Err(spec_error(
                "max_num_processes",
                "max_num_processes must be at least 1",
            ));
        }
        if let Some(reference) = &doc.reference {
            validate_reference(reference, &parameters)?;
        }
        let fixed_params = match &doc.fixed_params {
            Some(fragment) => {
                match resolve_fragment(fragment, base_dir, SweepError::InvalidSpec)? {
                    Value::Object(map) => map.into_iter().collect(),
                    Value::Null => BTreeMap::new(),
                    _ => {
                        return Err(spec_error(
                            "fixed_params_shape",
                            "fixed_params must be a mapping",
                        ))
                    }
                }
            }
            None => BTreeMap::new(),
        };
        let cost = CostFunction::from_config(
            doc.cost_fcn.as_ref(),
            doc.constraints.as_ref(),
            base_dir,
        )?;
        Ok(Self {
            parameters,
            input_map,
            fixed_params,
            cost,
            mode: SamplingMode::from_flag(doc.use_monte_carlo),
            time_offset: doc.time_offset,
            reference: doc.reference,
            seed: doc.seed,
            max_num_processes: doc.max_num_processes,
            base_dir: base_dir.to_path_buf(),
        })
    }
}

fn validate_reference(
    reference: &Assignment,
    parameters: &ParameterSpec,
) -> Result<(), SweepError> {
    if let Some(unknown) = reference.keys().find(|name| !parameters.contains(name)) {
        return Err(SweepError::InvalidSpec(
            ErrorInfo::new("reference_unknown", "reference assigns an undeclared parameter")
                .with_context("parameter", unknown.clone()),
        ));
    }
    if let Some(missing) = parameters.names().find(|name| !reference.contains_key(*name)) {
        return Err(SweepError::InvalidSpec(
            ErrorInfo::new("reference_incomplete", "reference must assign every parameter")
                .with_context("parameter", missing),
        ));
    }
    Ok(())
}

/// Loads a configuration file; relative references resolve next to it.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SweepConfig, SweepError> {
    let config_path = path.as_ref();
    let text = fs::read_to_string(config_path).map_err(|err| {
        SweepError::InvalidSpec(
            ErrorInfo::new("config_read", err.to_string())
                .with_context("path", config_path.display().to_string()),
        )
    })?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    SweepConfig::from_yaml_str(&text, base_dir)
}

/// Returns an inline fragment as-is or loads it from a `.yml`/`.yaml` path.
///
/// `wrap` selects the error family reported for bad references.
pub(crate) fn resolve_fragment(
    fragment: &Value,
    base_dir: &Path,
    wrap: fn(ErrorInfo) -> SweepError,
) -> Result<Value, SweepError> {
    let reference = match fragment {
        Value::String(reference) => reference,
        other => return Ok(other.clone()),
    };
    let path = PathBuf::from(reference);
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    );
    if !is_yaml {
        return Err(wrap(
            ErrorInfo::new("fragment_reference", "expected an inline value or a .yml/.yaml file")
                .with_context("value", reference.clone()),
        ));
    }
    let resolved = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };
    let bytes = fs::read(&resolved).map_err(|err| {
        wrap(
            ErrorInfo::new("fragment_read", err.to_string())
                .with_context("path", resolved.display().to_string()),
        )
    })?;
    let yaml: serde_yaml::Value = serde_yaml::from_slice(&bytes).map_err(|err| {
        wrap(
            ErrorInfo::new("fragment_parse", err.to_string())
                .with_context("path", resolved.display().to_string()),
        )
    })?;
    yaml_to_json(&yaml)
}
