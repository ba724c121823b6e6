use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::{CancellationToken, RngHandle};
use tracing::info;

use crate::aggregate::Aggregator;
use crate::cancel::STOP_FILE;
use crate::config::SweepConfig;
use crate::dispatch::{schedule, ScheduleReport, SchedulerOpts};
use crate::grid::SamplingMode;
use crate::metrics::MetricsExtractor;
use crate::pool::SimulatorPool;
use crate::template::{descriptor_path, list_tasks, materialize_all, TaskTemplate};

/// On-disk layout of one sweep output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepLayout {
    root: PathBuf,
}

impl SweepLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of generated task descriptors.
    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// Directory of per-task simulator output.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Cumulative results table.
    pub fn results_path(&self) -> PathBuf {
        self.root.join("results.json")
    }

    /// CSV export of the results table.
    pub fn csv_path(&self) -> PathBuf {
        self.root.join("results.csv")
    }

    /// Stop sentinel.
    pub fn stop_path(&self) -> PathBuf {
        self.root.join(STOP_FILE)
    }
}

/// Summary of a sweep run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Descriptors written during this run.
    pub generated: usize,
    /// Descriptors skipped because the table already records them.
    pub skipped: usize,
    /// Scheduler summary.
    pub schedule: ScheduleReport,
}

/// Master seed for Monte Carlo draws: the configured one, or a fresh one.
pub fn resolve_seed(config: &SweepConfig) -> u64 {
    match config.seed {
        Some(seed) => seed,
        None => {
            let seed = RngHandle::from_entropy().next_u64();
            if config.mode == SamplingMode::MonteCarlo {
                info!(seed, "no seed configured, sampling with a fresh seed");
            }
            seed
        }
    }
}

/// Materializes every descriptor under the layout's task directory.
pub fn generate(
    config: &SweepConfig,
    template: &TaskTemplate,
    layout: &SweepLayout,
) -> Result<Vec<String>, SweepError> {
    fs::create_dir_all(layout.root()).map_err(|err| {
        SweepError::Serde(
            ErrorInfo::new("out_dir_create", err.to_string())
                .with_context("path", layout.root().display().to_string()),
        )
    })?;
    materialize_all(config, template, &layout.tasks_dir(), resolve_seed(config))
}

/// Generates, schedules and aggregates a sweep.
///
/// Descriptors already on disk are reused and tasks already present in the
/// results table are not run again, so an interrupted sweep resumes where
/// it stopped.
pub fn run_sweep(
    config: &SweepConfig,
    template: &TaskTemplate,
    layout: &SweepLayout,
    pool: &dyn SimulatorPool,
    extractor: &dyn MetricsExtractor,
    token: &CancellationToken,
    opts: &SchedulerOpts,
) -> Result<SweepReport, SweepError> {
    let generated = generate(config, template, layout)?;
    let aggregator = Aggregator::open(
        &layout.results_path(),
        config.input_map.paths().map(str::to_string),
        config.cost.as_ref(),
        extractor,
        config.time_offset,
    )?;

    let recorded = aggregator.completed_tasks()?;
    let tasks_dir = layout.tasks_dir();
    let mut pending = Vec::new();
    let mut skipped = 0;
    for name in list_tasks(&tasks_dir)? {
        if recorded.contains(&name) {
            skipped += 1;
        } else {
            pending.push(descriptor_path(&tasks_dir, &name));
        }
    }
    info!(
        generated = generated.len(),
        skipped,
        pending = pending.len(),
        workers = opts.workers,
        "starting sweep"
    );

    let schedule = schedule(pending, pool, &aggregator, &layout.runs_dir(), token, opts)?;
    let table = aggregator.snapshot()?;
    if !table.is_empty() {
        table.export_csv(&layout.csv_path())?;
    }
    Ok(SweepReport {
        generated: generated.len(),
        skipped,
        schedule,
    })
}
