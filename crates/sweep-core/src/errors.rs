//! Structured error types shared across sweep crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`SweepError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, parameter names, task names).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the sweep orchestrator.
///
/// Only [`SweepError::TaskExecution`] is recoverable: the scheduler requeues
/// the task. Every other family aborts the run before or while touching the
/// cumulative table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum SweepError {
    /// Malformed parameter specification, input map or sweep configuration.
    #[error("invalid spec: {0}")]
    InvalidSpec(ErrorInfo),
    /// Malformed task template.
    #[error("invalid template: {0}")]
    InvalidTemplate(ErrorInfo),
    /// Malformed cost or constraint configuration.
    #[error("invalid cost spec: {0}")]
    InvalidCostSpec(ErrorInfo),
    /// A single task failed to run or to produce readable output.
    #[error("task execution failure: {0}")]
    TaskExecution(ErrorInfo),
    /// The cumulative results table could not be read or written.
    #[error("aggregation io failure: {0}")]
    AggregationIo(ErrorInfo),
    /// Serialization and filesystem errors outside the results table.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl SweepError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SweepError::InvalidSpec(info)
            | SweepError::InvalidTemplate(info)
            | SweepError::InvalidCostSpec(info)
            | SweepError::TaskExecution(info)
            | SweepError::AggregationIo(info)
            | SweepError::Serde(info) => info,
        }
    }

    /// Returns true when the failure is scoped to one task and may be retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SweepError::TaskExecution(_))
    }

    /// Shorthand for an [`SweepError::InvalidSpec`] without context.
    pub fn invalid_spec(code: &str, message: impl Into<String>) -> Self {
        SweepError::InvalidSpec(ErrorInfo::new(code, message))
    }

    /// Shorthand for an [`SweepError::InvalidTemplate`] without context.
    pub fn invalid_template(code: &str, message: impl Into<String>) -> Self {
        SweepError::InvalidTemplate(ErrorInfo::new(code, message))
    }

    /// Shorthand for an [`SweepError::InvalidCostSpec`] without context.
    pub fn invalid_cost(code: &str, message: impl Into<String>) -> Self {
        SweepError::InvalidCostSpec(ErrorInfo::new(code, message))
    }
}
