#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{json, Map, Value};
use sweep_core::CancellationToken;
use sweep_exp::pool::{task_name_of, task_output_dir};
use sweep_exp::{PoolOutcome, SimulatorPool, TaskFailure, TaskResult};

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join(relative)
}

pub fn descriptor_params(path: &Path) -> Map<String, Value> {
    let bytes = fs::read(path).expect("read descriptor");
    let yaml: serde_yaml::Value = serde_yaml::from_slice(&bytes).expect("parse descriptor");
    let document: Value = serde_json::to_value(yaml).expect("descriptor json");
    document["execute"]["params"]
        .as_object()
        .cloned()
        .expect("execute.params")
}

/// In-process pool: writes `kpis.json` with `err = 0.1 * gain` and `speed = 1`.
#[derive(Default)]
pub struct StubPool {
    batches: Mutex<Vec<Vec<String>>>,
    failures: Mutex<BTreeMap<String, u32>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl StubPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `task` fail the next `times` runs.
    pub fn failing(self, task: &str, times: u32) -> Self {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(task.to_string(), times);
        self
    }

    /// Cancels `token` once `batches` batches have run.
    pub fn cancelling_after(mut self, batches: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((batches, token));
        self
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().expect("batches lock").clone()
    }

    pub fn runs_of(&self, task: &str) -> usize {
        self.batches()
            .iter()
            .flatten()
            .filter(|name| name.as_str() == task)
            .count()
    }
}

impl SimulatorPool for StubPool {
    fn run(&self, tasks: &[PathBuf], _workers: usize, output_root: &Path) -> PoolOutcome {
        let names: Vec<String> = tasks.iter().map(|path| task_name_of(path)).collect();
        let batch_count = {
            let mut batches = self.batches.lock().expect("batches lock");
            batches.push(names);
            batches.len()
        };

        let mut outcome = PoolOutcome::default();
        for task_path in tasks {
            let name = task_name_of(task_path);
            {
                let mut failures = self.failures.lock().expect("failures lock");
                if let Some(remaining) = failures.get_mut(&name) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        outcome.failed.push(TaskFailure {
                            task_path: task_path.clone(),
                            reason: "stub failure".to_string(),
                        });
                        continue;
                    }
                }
            }
            let params = descriptor_params(task_path);
            let gain = params["controller.gain"].as_f64().expect("numeric gain");
            let task_dir = task_output_dir(output_root, task_path);
            let results_dir = task_dir.join("results");
            fs::create_dir_all(&results_dir).expect("results dir");
            let kpis = json!({"err": 0.1 * gain, "speed": 1.0, "steps": 100, "stable": true});
            fs::write(
                results_dir.join("kpis.json"),
                serde_json::to_vec(&kpis).expect("kpi json"),
            )
            .expect("write kpis");
            outcome.completed.push(TaskResult {
                task_path: task_path.clone(),
                recording: task_dir.join("recording"),
                results_dir,
            });
        }

        if let Some((after, token)) = &self.cancel_after {
            if batch_count >= *after {
                token.cancel();
            }
        }
        outcome
    }
}
