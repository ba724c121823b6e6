use std::fs::{self, File};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, warn};

/// Artefacts of a simulation that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    /// Descriptor the simulation was started with.
    pub task_path: PathBuf,
    /// Recording produced by the simulator.
    pub recording: PathBuf,
    /// Directory holding per-task result artefacts.
    pub results_dir: PathBuf,
}

impl TaskResult {
    /// Task name derived from the descriptor file stem.
    pub fn task_name(&self) -> String {
        task_name_of(&self.task_path)
    }
}

/// A task the pool could not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Descriptor that failed.
    pub task_path: PathBuf,
    /// Short diagnostic.
    pub reason: String,
}

/// Successes and failures of one pool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Tasks that completed.
    pub completed: Vec<TaskResult>,
    /// Tasks that failed.
    pub failed: Vec<TaskFailure>,
}

/// Runs a batch of task descriptors with bounded parallelism.
///
/// Implementations return only after every task in the batch finished or
/// failed.
pub trait SimulatorPool: Send + Sync {
    /// Runs `tasks` with at most `workers` concurrent simulations, writing
    /// per-task artefacts below `output_root`.
    fn run(&self, tasks: &[PathBuf], workers: usize, output_root: &Path) -> PoolOutcome;
}

/// Task name of a descriptor path (its file stem).
pub fn task_name_of(task_path: &Path) -> String {
    task_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Directory receiving the artefacts of `task_path` under `output_root`.
pub fn task_output_dir(output_root: &Path, task_path: &Path) -> PathBuf {
    output_root.join(task_name_of(task_path))
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pool launching an external command once per descriptor.
///
/// The command is invoked as `<program> <args…> <descriptor> <task dir>`.
/// The simulator writes its recording to `<task dir>/recording` and its
/// results to `<task dir>/results`; exit status 0 means success.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessPool {
    /// Builds a pool from a command line; `None` when it is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: None,
        })
    }

    /// Kills simulations running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run_one(&self, task_path: &Path, output_root: &Path) -> Result<TaskResult, TaskFailure> {
        let fail = |reason: String| TaskFailure {
            task_path: task_path.to_path_buf(),
            reason,
        };
        let task_dir = task_output_dir(output_root, task_path);
        let results_dir = task_dir.join("results");
        fs::create_dir_all(&results_dir)
            .map_err(|err| fail(format!("create {}: {err}", results_dir.display())))?;
        let stdout = File::create(task_dir.join("stdout.log"))
            .map_err(|err| fail(format!("stdout log: {err}")))?;
        let stderr = File::create(task_dir.join("stderr.log"))
            .map_err(|err| fail(format!("stderr log: {err}")))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(task_path)
            .arg(&task_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        // Own process group: a terminal Ctrl-C reaches the orchestrator only,
        // and in-flight simulations finish their batch.
        #[cfg(unix)]
        command.process_group(0);

        let started_at = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|err| fail(format!("spawn {}: {err}", self.program)))?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(timeout) = self.timeout {
                        if started_at.elapsed() >= timeout {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(fail(format!("timed out after {}s", timeout.as_secs_f64())));
                        }
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(fail(format!("wait: {err}"))),
            }
        };
        debug!(
            task = %task_name_of(task_path),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            code = ?status.code(),
            "simulation exited"
        );
        if !status.success() {
            return Err(fail(match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }));
        }
        Ok(TaskResult {
            task_path: task_path.to_path_buf(),
            recording: task_dir.join("recording"),
            results_dir,
        })
    }
}

impl SimulatorPool for ProcessPool {
    fn run(&self, tasks: &[PathBuf], workers: usize, output_root: &Path) -> PoolOutcome {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                warn!(error = %err, "could not build worker pool");
                return PoolOutcome {
                    completed: Vec::new(),
                    failed: tasks
                        .iter()
                        .map(|task_path| TaskFailure {
                            task_path: task_path.clone(),
                            reason: format!("worker pool: {err}"),
                        })
                        .collect(),
                };
            }
        };
        let results: Vec<Result<TaskResult, TaskFailure>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|task_path| self.run_one(task_path, output_root))
                .collect()
        });
        let mut outcome = PoolOutcome::default();
        for result in results {
            match result {
                Ok(done) => outcome.completed.push(done),
                Err(failure) => outcome.failed.push(failure),
            }
        }
        outcome
    }
}
