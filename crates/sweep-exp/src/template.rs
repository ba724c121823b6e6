use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use sweep_core::errors::{ErrorInfo, SweepError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::grid::{expand, Assignment};
use crate::serde::{from_yaml_slice, to_yaml_string, yaml_to_json};

/// Name of the descriptor generated for the reference assignment.
pub const REFERENCE_TASK: &str = "reference";

fn io_error(code: &str, path: &Path, err: impl ToString) -> SweepError {
    SweepError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Mapping from task-parameter path to a literal or a parameter placeholder.
///
/// A string value naming a declared parameter is a placeholder; lists may
/// mix placeholders and literals. Everything else is copied verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputMap {
    entries: BTreeMap<String, Value>,
    parameters: BTreeSet<String>,
}

impl InputMap {
    /// Validates a raw input map against the declared parameter names.
    pub fn from_raw<'a>(
        raw: &BTreeMap<String, Value>,
        parameters: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, SweepError> {
        let parameters: BTreeSet<String> = parameters.into_iter().map(str::to_string).collect();
        for (path, value) in raw {
            if path.trim().is_empty() {
                return Err(SweepError::invalid_spec(
                    "input_map_path",
                    "input map paths must not be empty",
                ));
            }
            if !is_mappable(value) {
                return Err(SweepError::InvalidSpec(
                    ErrorInfo::new(
                        "input_map_value",
                        "input map values must be scalars or lists of scalars",
                    )
                    .with_context("path", path.clone()),
                ));
            }
        }
        let map = Self {
            entries: raw.clone(),
            parameters,
        };
        let referenced = map.referenced_parameters();
        if !map.parameters.is_empty() && referenced.is_empty() {
            return Err(SweepError::InvalidSpec(
                ErrorInfo::new("input_map_unbound", "input map references no declared parameter")
                    .with_hint("use a parameter name as the value of an input map entry"),
            ));
        }
        Ok(map)
    }

    /// Task-parameter paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Parameter names used as placeholders somewhere in the map.
    pub fn referenced_parameters(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for value in self.entries.values() {
            self.collect_placeholders(value, &mut names);
        }
        names
    }

    fn collect_placeholders<'a>(&'a self, value: &'a Value, names: &mut BTreeSet<&'a str>) {
        match value {
            Value::String(name) if self.parameters.contains(name) => {
                names.insert(name.as_str());
            }
            Value::Array(items) => items
                .iter()
                .for_each(|item| self.collect_placeholders(item, names)),
            _ => {}
        }
    }

    /// Resolves every path against one assignment.
    ///
    /// Placeholder numbers become floats; strings and booleans are unchanged.
    pub fn substitute(&self, assignment: &Assignment) -> Result<Map<String, Value>, SweepError> {
        let mut resolved = Map::new();
        for (path, value) in &self.entries {
            resolved.insert(path.clone(), self.resolve(path, value, assignment)?);
        }
        Ok(resolved)
    }

    fn resolve(
        &self,
        path: &str,
        value: &Value,
        assignment: &Assignment,
    ) -> Result<Value, SweepError> {
        match value {
            Value::String(name) if self.parameters.contains(name) => {
                let bound = assignment.get(name).ok_or_else(|| {
                    SweepError::InvalidSpec(
                        ErrorInfo::new("assignment_missing", "assignment lacks a mapped parameter")
                            .with_context("parameter", name.clone())
                            .with_context("path", path),
                    )
                })?;
                Ok(coerce(bound))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(path, item, assignment))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            literal => Ok(literal.clone()),
        }
    }
}

fn is_mappable(value: &Value) -> bool {
    match value {
        Value::Object(_) => false,
        Value::Array(items) => items.iter().all(is_mappable),
        _ => true,
    }
}

fn coerce(value: &Value) -> Value {
    match value.as_f64() {
        Some(number) if value.is_number() => json!(number),
        _ => value.clone(),
    }
}

/// Base task descriptor with an `execute.params` mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTemplate {
    document: Value,
}

impl TaskTemplate {
    /// Loads a YAML template from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SweepError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            SweepError::InvalidTemplate(
                ErrorInfo::new("template_read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let yaml: serde_yaml::Value = from_yaml_slice(&bytes).map_err(|err| {
            SweepError::InvalidTemplate(
                ErrorInfo::new("template_parse", err.info().message.clone())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_value(yaml_to_json(&yaml)?)
    }

    /// Wraps an in-memory document, checking for `execute.params`.
    pub fn from_value(document: Value) -> Result<Self, SweepError> {
        let params = document
            .get("execute")
            .and_then(|execute| execute.get("params"));
        match params {
            Some(Value::Object(_)) => Ok(Self { document }),
            Some(_) => Err(SweepError::invalid_template(
                "template_params_shape",
                "execute.params must be a mapping",
            )),
            None => Err(SweepError::InvalidTemplate(
                ErrorInfo::new("template_params_missing", "template lacks execute.params")
                    .with_hint("add an `execute: {params: {}}` section"),
            )),
        }
    }

    /// Renders a concrete descriptor for one assignment.
    ///
    /// Fixed parameters are written last and win over mapped values.
    pub fn render(
        &self,
        assignment: &Assignment,
        input_map: &InputMap,
        fixed_params: &BTreeMap<String, Value>,
    ) -> Result<Value, SweepError> {
        let mut document = self.document.clone();
        let resolved = input_map.substitute(assignment)?;
        let params = document
            .get_mut("execute")
            .and_then(|execute| execute.get_mut("params"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                SweepError::invalid_template(
                    "template_params_missing",
                    "template lacks execute.params",
                )
            })?;
        params.extend(resolved);
        for (path, value) in fixed_params {
            params.insert(path.clone(), value.clone());
        }
        Ok(document)
    }

    /// Writes the rendered descriptor to `target` unless a valid one exists.
    ///
    /// The file is written next to `target` and moved into place, so a crash
    /// never leaves a partial descriptor behind. An existing descriptor that
    /// does not parse (an empty file from an older interrupted run) is
    /// replaced. Returns true when a file was written.
    pub fn materialize(
        &self,
        assignment: &Assignment,
        input_map: &InputMap,
        fixed_params: &BTreeMap<String, Value>,
        target: &Path,
    ) -> Result<bool, SweepError> {
        let stale = match fs::read(target) {
            Ok(bytes) if is_intact(&bytes) => {
                debug!(target = %target.display(), "descriptor exists, left untouched");
                return Ok(false);
            }
            Ok(_) => {
                warn!(target = %target.display(), "replacing unreadable descriptor");
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(io_error("descriptor_read", target, err)),
        };

        let rendered = self.render(assignment, input_map, fixed_params)?;
        let text = to_yaml_string(&rendered)?;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)
            .map_err(|err| io_error("descriptor_create", target, err))?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|err| io_error("descriptor_write", target, err))?;
        let persisted = if stale {
            file.persist(target).map(drop)
        } else {
            file.persist_noclobber(target).map(drop)
        };
        match persisted {
            Ok(()) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                debug!(target = %target.display(), "descriptor appeared concurrently");
                Ok(false)
            }
            Err(err) => Err(io_error("descriptor_persist", target, err.error)),
        }
    }
}

fn is_intact(bytes: &[u8]) -> bool {
    from_yaml_slice::<serde_yaml::Value>(bytes)
        .and_then(|yaml| yaml_to_json(&yaml))
        .and_then(TaskTemplate::from_value)
        .is_ok()
}

/// Deterministic descriptor name for the combination at `index`.
pub fn task_name(index: usize) -> String {
    format!("task_{index}")
}

/// Path of the descriptor called `name` inside `tasks_dir`.
pub fn descriptor_path(tasks_dir: &Path, name: &str) -> PathBuf {
    tasks_dir.join(format!("{name}.yaml"))
}

/// Writes one descriptor per grid combination plus the optional reference.
///
/// Returns the names of the descriptors written during this call; existing
/// descriptors are kept as they are.
pub fn materialize_all(
    config: &SweepConfig,
    template: &TaskTemplate,
    tasks_dir: &Path,
    seed: u64,
) -> Result<Vec<String>, SweepError> {
    fs::create_dir_all(tasks_dir).map_err(|err| io_error("tasks_dir_create", tasks_dir, err))?;
    let assignments = expand(&config.parameters, config.mode, seed);
    let mut written = Vec::new();
    for (index, assignment) in assignments.iter().enumerate() {
        let name = task_name(index);
        let target = descriptor_path(tasks_dir, &name);
        if template.materialize(assignment, &config.input_map, &config.fixed_params, &target)? {
            written.push(name);
        }
    }
    if let Some(reference) = &config.reference {
        let target = descriptor_path(tasks_dir, REFERENCE_TASK);
        if template.materialize(reference, &config.input_map, &config.fixed_params, &target)? {
            written.push(REFERENCE_TASK.to_string());
        }
    }
    info!(
        combinations = assignments.len(),
        written = written.len(),
        dir = %tasks_dir.display(),
        "materialized task descriptors"
    );
    Ok(written)
}

/// Descriptor names found in `tasks_dir`, in natural order.
pub fn list_tasks(tasks_dir: &Path) -> Result<Vec<String>, SweepError> {
    let entries =
        fs::read_dir(tasks_dir).map_err(|err| io_error("tasks_dir_read", tasks_dir, err))?;
    let mut names = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| io_error("tasks_dir_read", tasks_dir, err))?
            .path();
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

/// Compares strings treating embedded digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let lhs = take_digits(&mut left);
                let rhs = take_digits(&mut right);
                let lhs_trimmed = lhs.trim_start_matches('0');
                let rhs_trimmed = rhs.trim_start_matches('0');
                let order = lhs_trimmed
                    .len()
                    .cmp(&rhs_trimmed.len())
                    .then_with(|| lhs_trimmed.cmp(rhs_trimmed))
                    .then_with(|| lhs.len().cmp(&rhs.len()));
                if order != Ordering::Equal {
                    return order;
                }
            }
            (Some(l), Some(r)) => {
                if l != r {
                    return l.cmp(&r);
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(ch) = chars.peek().copied() {
        if !ch.is_ascii_digit() {
            break;
        }
        digits.push(ch);
        chars.next();
    }
    digits
}
