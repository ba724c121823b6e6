//! Cooperative cancellation token polled by the scheduler between batches.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag, optionally backed by a sentinel file.
///
/// Clones observe the same flag. When a sentinel path is attached, the
/// presence of that file also counts as a stop request, so a separate
/// process can stop a sweep by touching it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    sentinel: Option<PathBuf>,
}

impl CancellationToken {
    /// Creates a token that is only cancelled through [`CancellationToken::cancel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that also reports cancellation when `sentinel` exists.
    pub fn with_sentinel(sentinel: impl Into<PathBuf>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sentinel: Some(sentinel.into()),
        }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested by flag or sentinel.
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.sentinel
            .as_deref()
            .map(Path::exists)
            .unwrap_or(false)
    }

    /// Sentinel file watched by this token, if any.
    pub fn sentinel(&self) -> Option<&Path> {
        self.sentinel.as_deref()
    }
}
