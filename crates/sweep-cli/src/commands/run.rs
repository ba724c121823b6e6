use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use sweep_exp::serde::to_canonical_json_bytes;
use sweep_exp::{
    load_config, run_sweep, CancelController, FileKpiExtractor, ProcessPool, SchedulerOpts,
    SweepLayout, TaskTemplate,
};
use tracing::warn;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Sweep configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,
    /// Base task descriptor (YAML) with an `execute.params` mapping.
    #[arg(long)]
    pub template: PathBuf,
    /// Sweep output directory, reused when resuming.
    #[arg(long)]
    pub out: PathBuf,
    /// Concurrent simulations; defaults to `max_num_processes` from the config.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Attempts per task before it is given up.
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,
    /// Delete per-task simulator output once a task is recorded.
    #[arg(long)]
    pub cleanup: bool,
    /// Kill simulations running longer than this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Simulator command, invoked as `<command…> <descriptor> <task dir>`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    let template = TaskTemplate::load(&args.template)?;
    let layout = SweepLayout::new(&args.out);
    fs::create_dir_all(layout.root())?;

    let controller = CancelController::new(layout.stop_path())?;
    controller.install_signal_handler()?;

    let mut pool = ProcessPool::new(&args.command).ok_or("simulator command is empty")?;
    if let Some(secs) = args.timeout_secs {
        pool = pool.with_timeout(Duration::from_secs(secs));
    }
    let opts = SchedulerOpts {
        workers: args.workers.unwrap_or(config.max_num_processes).max(1),
        max_attempts: args.max_attempts.max(1),
        cleanup_results: args.cleanup,
    };

    let report = run_sweep(
        &config,
        &template,
        &layout,
        &pool,
        &FileKpiExtractor,
        &controller.token(),
        &opts,
    )?;
    fs::write(
        layout.root().join("sweep_report.json"),
        to_canonical_json_bytes(&report)?,
    )?;
    if !report.schedule.permanently_failed.is_empty() {
        warn!(
            tasks = ?report.schedule.permanently_failed,
            "some tasks failed permanently; rerun to retry them"
        );
    }
    if report.schedule.cancelled {
        println!("sweep stopped early; rerun the same command to resume");
    }
    println!(
        "{} tasks recorded, {} already present, {} failed",
        report.schedule.completed.len(),
        report.skipped,
        report.schedule.permanently_failed.len()
    );
    Ok(())
}
