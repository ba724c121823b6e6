use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sweep_core::errors::SweepError;
use sweep_core::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, FoldOutcome};
use crate::pool::{task_name_of, task_output_dir, SimulatorPool, TaskFailure};

/// Options governing batch scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOpts {
    /// Concurrent simulations per batch; batches hold `2 * workers` tasks.
    pub workers: usize,
    /// Attempts per task before it is reported as permanently failed.
    pub max_attempts: u32,
    /// Delete each task's output directory once its row is recorded.
    pub cleanup_results: bool,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            cleanup_results: false,
        }
    }
}

impl SchedulerOpts {
    /// Number of tasks handed to the pool per batch.
    pub fn batch_size(&self) -> usize {
        self.workers.max(1) * 2
    }
}

/// Summary of one scheduling run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Batches handed to the pool.
    pub batches: usize,
    /// Tasks recorded in the table during this run, in completion order.
    pub completed: Vec<String>,
    /// Number of times a failed task was put back into the queue.
    pub requeued: usize,
    /// Tasks that exhausted their attempts.
    pub permanently_failed: Vec<String>,
    /// True when a stop request ended the run early.
    pub cancelled: bool,
}

/// Runs `tasks` through `pool` in batches, folding results after each one.
///
/// Cancellation is checked before every batch, never inside one. Failed
/// tasks go to the back of the queue until they have used
/// `opts.max_attempts` attempts. Recoverable aggregation failures count as
/// failed attempts; any other aggregation error aborts the run.
pub fn schedule(
    tasks: Vec<PathBuf>,
    pool: &dyn SimulatorPool,
    aggregator: &Aggregator<'_>,
    output_root: &Path,
    token: &CancellationToken,
    opts: &SchedulerOpts,
) -> Result<ScheduleReport, SweepError> {
    let max_attempts = opts.max_attempts.max(1);
    let workers = opts.workers.max(1);
    let mut queue: VecDeque<PathBuf> = tasks.into_iter().collect();
    let mut attempts: BTreeMap<PathBuf, u32> = BTreeMap::new();
    let mut report = ScheduleReport::default();

    while !queue.is_empty() {
        if token.is_cancelled() {
            info!(pending = queue.len(), "stop requested, ending before next batch");
            report.cancelled = true;
            break;
        }
        let take = opts.batch_size().min(queue.len());
        let batch: Vec<PathBuf> = queue.drain(..take).collect();
        report.batches += 1;
        info!(
            batch = report.batches,
            tasks = batch.len(),
            pending = queue.len(),
            "running batch"
        );

        let outcome = pool.run(&batch, workers, output_root);
        let mut unreported: BTreeSet<&PathBuf> = batch.iter().collect();
        let mut failures: Vec<TaskFailure> = Vec::new();
        for failure in outcome.failed {
            unreported.remove(&failure.task_path);
            failures.push(failure);
        }

        let folded = aggregator.fold_batch(&outcome.completed);
        for (result, fold) in outcome.completed.iter().zip(folded) {
            unreported.remove(&result.task_path);
            match fold {
                Ok(FoldOutcome::Added) => {
                    report.completed.push(result.task_name());
                    if opts.cleanup_results {
                        remove_output(output_root, &result.task_path);
                    }
                }
                Ok(FoldOutcome::AlreadyPresent) => {
                    debug!(task = %result.task_name(), "task already recorded");
                }
                Err(err) if err.is_recoverable() => failures.push(TaskFailure {
                    task_path: result.task_path.clone(),
                    reason: err.to_string(),
                }),
                Err(err) => return Err(err),
            }
        }
        failures.extend(unreported.into_iter().map(|task_path| TaskFailure {
            task_path: task_path.clone(),
            reason: "not reported by simulator pool".to_string(),
        }));

        for failure in failures {
            let used = attempts.entry(failure.task_path.clone()).or_insert(0);
            *used += 1;
            let task = task_name_of(&failure.task_path);
            if *used < max_attempts {
                warn!(
                    task = %task,
                    attempt = *used,
                    reason = %failure.reason,
                    "task failed, requeued"
                );
                report.requeued += 1;
                queue.push_back(failure.task_path);
            } else {
                warn!(
                    task = %task,
                    attempts = *used,
                    reason = %failure.reason,
                    "task failed permanently"
                );
                report.permanently_failed.push(task);
            }
        }
    }

    info!(
        batches = report.batches,
        completed = report.completed.len(),
        requeued = report.requeued,
        failed = report.permanently_failed.len(),
        cancelled = report.cancelled,
        "schedule finished"
    );
    Ok(report)
}

fn remove_output(output_root: &Path, task_path: &Path) {
    let dir = task_output_dir(output_root, task_path);
    if let Err(err) = fs::remove_dir_all(&dir) {
        debug!(dir = %dir.display(), error = %err, "could not remove task output");
    }
}
