use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sweep_core::errors::{ErrorInfo, SweepError};
use sweep_core::CancellationToken;
use tracing::{info, warn};

/// Name of the stop sentinel written into the sweep output directory.
pub const STOP_FILE: &str = "STOP";

fn sentinel_error(code: &str, path: &Path, err: impl ToString) -> SweepError {
    SweepError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Owns the stop sentinel of one sweep and the token derived from it.
///
/// A stop request becomes visible to the scheduler at the next batch
/// boundary, whether it comes from [`CancelController::request_stop`], a
/// signal, or another process creating the sentinel file.
#[derive(Debug, Clone)]
pub struct CancelController {
    sentinel: PathBuf,
    token: CancellationToken,
}

impl CancelController {
    /// Creates a controller, removing any sentinel left by an earlier run.
    pub fn new(sentinel: impl Into<PathBuf>) -> Result<Self, SweepError> {
        let sentinel = sentinel.into();
        match fs::remove_file(&sentinel) {
            Ok(()) => info!(path = %sentinel.display(), "removed stale stop sentinel"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(sentinel_error("sentinel_remove", &sentinel, err)),
        }
        let token = CancellationToken::with_sentinel(sentinel.clone());
        Ok(Self { sentinel, token })
    }

    /// Token handed to the scheduler.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sentinel path watched by the token.
    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }

    /// Sets the stop flag and records the request in the sentinel file.
    pub fn request_stop(&self) -> Result<(), SweepError> {
        self.token.cancel();
        if let Some(parent) = self.sentinel.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| sentinel_error("sentinel_dir", parent, err))?;
        }
        let stamp = format!("stop requested at {}\n", Utc::now().to_rfc3339());
        fs::write(&self.sentinel, stamp)
            .map_err(|err| sentinel_error("sentinel_write", &self.sentinel, err))?;
        info!(path = %self.sentinel.display(), "stop requested");
        Ok(())
    }

    /// Routes SIGINT/SIGTERM to [`CancelController::request_stop`].
    ///
    /// Only one handler can be installed per process.
    pub fn install_signal_handler(&self) -> Result<(), SweepError> {
        let controller = self.clone();
        ctrlc::set_handler(move || {
            if let Err(err) = controller.request_stop() {
                controller.token.cancel();
                warn!(error = %err, "stop sentinel not written");
            }
        })
        .map_err(|err| SweepError::Serde(ErrorInfo::new("signal_handler", err.to_string())))
    }
}
