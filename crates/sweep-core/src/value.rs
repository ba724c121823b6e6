//! Tagged cell values stored in the cumulative results table.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cell of a result row.
///
/// Absent cells are represented by a missing key rather than a variant.
/// The JSON encoding is the natural one for each variant, so integers and
/// booleans survive a write/read cycle without being widened to floats.
/// Non-finite floats are written as `null` by `serde_json` and therefore
/// reload as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Boolean outcome, typically a pass/fail constraint or KPI flag.
    Bool(bool),
    /// Integer KPI or parameter value.
    Int(i64),
    /// Floating point KPI or parameter value.
    Float(f64),
    /// Free-form string value.
    Text(String),
}

impl CellValue {
    /// Converts a JSON value into a cell. `null` maps to `None` (absent).
    ///
    /// Arrays and objects are kept as their compact JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(flag) => Some(CellValue::Bool(*flag)),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Some(CellValue::Int(int))
                } else {
                    number.as_f64().map(CellValue::Float)
                }
            }
            Value::String(text) => Some(CellValue::Text(text.clone())),
            other => Some(CellValue::Text(other.to_string())),
        }
    }

    /// Returns the numeric view of the cell, if any. Booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            CellValue::Int(int) => Some(*int as f64),
            CellValue::Float(float) => Some(*float),
            CellValue::Text(_) => None,
        }
    }

    /// Returns the string payload for text cells.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(flag) => write!(f, "{flag}"),
            CellValue::Int(int) => write!(f, "{int}"),
            CellValue::Float(float) => write!(f, "{float}"),
            CellValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}
