#![deny(missing_docs)]
#![doc = "Core error, value and cancellation types shared by the sweep crates."]

use std::collections::BTreeMap;

pub mod cancel;
pub mod errors;
pub mod rng;
mod value;

pub use cancel::CancellationToken;
pub use errors::{ErrorInfo, SweepError};
pub use rng::{derive_substream_seed, RngHandle};
pub use value::CellValue;

/// Flat mapping from KPI name to value produced for one completed task.
pub type KpiMap = BTreeMap<String, CellValue>;
