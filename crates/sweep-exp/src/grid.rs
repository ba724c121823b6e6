use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::rng::{derive_substream_seed, RngHandle};

/// One concrete parameter assignment (parameter name to value).
pub type Assignment = BTreeMap<String, Value>;

/// Enumeration mode selected by `use_monte_carlo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingMode {
    /// Evenly spaced values and full Cartesian product.
    #[default]
    Grid,
    /// Same product size, ranged parameters drawn uniformly per combination.
    MonteCarlo,
}

impl SamplingMode {
    /// Maps the configuration flag onto a mode.
    pub fn from_flag(use_monte_carlo: bool) -> Self {
        if use_monte_carlo {
            SamplingMode::MonteCarlo
        } else {
            SamplingMode::Grid
        }
    }
}

/// Numeric range descriptor `{min, max, count}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (inclusive in grid mode, exclusive when sampling).
    pub max: f64,
    /// Number of grid points, or draws per combination slot when sampling.
    pub count: usize,
}

impl RangeSpec {
    /// Evenly spaced values including both ends; `count == 1` yields `min`.
    pub fn linspace(&self) -> Vec<f64> {
        if self.count == 1 {
            return vec![self.min];
        }
        let step = (self.max - self.min) / (self.count - 1) as f64;
        (0..self.count)
            .map(|idx| {
                if idx + 1 == self.count {
                    self.max
                } else {
                    self.min + step * idx as f64
                }
            })
            .collect()
    }
}

/// Values declared for a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValues {
    /// Numeric range expanded according to the sampling mode.
    Range(RangeSpec),
    /// Explicit discrete values, passed through unchanged.
    Values(Vec<Value>),
}

impl ParameterValues {
    fn len(&self) -> usize {
        match self {
            ParameterValues::Range(range) => range.count,
            ParameterValues::Values(values) => values.len(),
        }
    }

    fn grid_values(&self) -> Vec<Value> {
        match self {
            ParameterValues::Range(range) => {
                range.linspace().into_iter().map(|v| json!(v)).collect()
            }
            ParameterValues::Values(values) => values.clone(),
        }
    }
}

/// Validated parameter specification, ordered by parameter name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ParameterSpec {
    entries: BTreeMap<String, ParameterValues>,
}

impl ParameterSpec {
    /// Builds a specification from raw configuration values.
    ///
    /// Each entry must be a non-empty list or a `{min, max, count}` mapping
    /// with `count >= 1` and `min <= max`.
    pub fn from_raw(raw: &BTreeMap<String, Value>) -> Result<Self, SweepError> {
        let mut entries = BTreeMap::new();
        for (name, value) in raw {
            entries.insert(name.clone(), parse_entry(name, value)?);
        }
        Ok(Self { entries })
    }

    /// Parameter names in enumeration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns true when the parameter is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns true when no parameter is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of combinations produced by [`expand`].
    pub fn combinations(&self) -> usize {
        self.entries.values().map(ParameterValues::len).product()
    }
}

fn parse_entry(name: &str, value: &Value) -> Result<ParameterValues, SweepError> {
    let invalid = |code: &str, message: &str| {
        SweepError::InvalidSpec(ErrorInfo::new(code, message).with_context("parameter", name))
    };
    match value {
        Value::Array(values) if values.is_empty() => {
            Err(invalid("parameter_empty", "parameter value list is empty"))
        }
        Value::Array(values) => Ok(ParameterValues::Values(values.clone())),
        Value::Object(map) => {
            let number = |key: &str| {
                map.get(key)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        invalid("parameter_range", "range needs numeric min, max and count")
                    })
            };
            if map.len() != 3 {
                return Err(invalid(
                    "parameter_range",
                    "range must contain exactly min, max and count",
                ));
            }
            let min = number("min")?;
            let max = number("max")?;
            let count = number("count")?;
            if count < 1.0 || count.fract() != 0.0 {
                return Err(invalid("parameter_count", "count must be a positive integer"));
            }
            if min > max {
                return Err(invalid("parameter_bounds", "min must not exceed max"));
            }
            Ok(ParameterValues::Range(RangeSpec {
                min,
                max,
                count: count as usize,
            }))
        }
        _ => Err(invalid(
            "parameter_shape",
            "parameter must be a list of values or a {min, max, count} mapping",
        )),
    }
}

/// Expands a parameter specification into concrete assignments.
///
/// Grid mode is deterministic: parameters are visited in name order and the
/// last name varies fastest. Monte Carlo mode keeps the same product size but
/// replaces every ranged value with one uniform draw in `[min, max)` per
/// combination, seeded from `seed` and the combination index.
pub fn expand(spec: &ParameterSpec, mode: SamplingMode, seed: u64) -> Vec<Assignment> {
    let axes: Vec<(&String, Vec<Value>)> = spec
        .entries
        .iter()
        .map(|(name, values)| (name, values.grid_values()))
        .collect();
    let mut outputs = Vec::with_capacity(spec.combinations());
    expand_grid(&axes, 0, BTreeMap::new(), &mut outputs);
    if mode == SamplingMode::MonteCarlo {
        resample(spec, seed, &mut outputs);
    }
    outputs
}

fn expand_grid(
    axes: &[(&String, Vec<Value>)],
    idx: usize,
    current: Assignment,
    outputs: &mut Vec<Assignment>,
) {
    if idx == axes.len() {
        outputs.push(current);
        return;
    }
    let (name, values) = &axes[idx];
    for value in values {
        let mut next = current.clone();
        next.insert((*name).clone(), value.clone());
        expand_grid(axes, idx + 1, next, outputs);
    }
}

fn resample(spec: &ParameterSpec, seed: u64, outputs: &mut [Assignment]) {
    for (idx, assignment) in outputs.iter_mut().enumerate() {
        let mut rng = RngHandle::from_seed(derive_substream_seed(seed, idx as u64));
        for (name, values) in &spec.entries {
            if let ParameterValues::Range(range) = values {
                assignment.insert(name.clone(), json!(rng.uniform(range.min, range.max)));
            }
        }
    }
}
