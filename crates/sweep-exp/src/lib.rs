#![deny(missing_docs)]
#![doc = "Resumable parameter sweeps over an external simulator."]

/// Folding of completed tasks into the results table.
pub mod aggregate;
/// Stop sentinel and signal wiring.
pub mod cancel;
/// Sweep configuration loading.
pub mod config;
/// Cost and constraint expressions.
pub mod cost;
/// Batch scheduling with retries.
pub mod dispatch;
/// Parameter grid expansion.
pub mod grid;
/// KPI extraction seam.
pub mod metrics;
/// Simulator pool seam and the process-backed pool.
pub mod pool;
/// Canonical JSON and YAML helpers.
pub mod serde;
/// Generate, run and resume entry points.
pub mod sweep;
/// Cumulative results table.
pub mod table;
/// Task descriptor rendering.
pub mod template;

pub use aggregate::{Aggregator, FoldOutcome, CONSTRAINT_COLUMN, COST_COLUMN};
pub use cancel::{CancelController, STOP_FILE};
pub use config::{load_config, SweepConfig};
pub use cost::{CostFunction, CostOutcome, Expr, Scalar};
pub use dispatch::{schedule, ScheduleReport, SchedulerOpts};
pub use grid::{expand, Assignment, ParameterSpec, ParameterValues, RangeSpec, SamplingMode};
pub use metrics::{FileKpiExtractor, MetricsExtractor, KPI_FILE};
pub use pool::{PoolOutcome, ProcessPool, SimulatorPool, TaskFailure, TaskResult};
pub use sweep::{generate, resolve_seed, run_sweep, SweepLayout, SweepReport};
pub use table::{CumulativeTable, ResultRow, TASK_COLUMN};
pub use template::{list_tasks, materialize_all, task_name, InputMap, TaskTemplate, REFERENCE_TASK};
