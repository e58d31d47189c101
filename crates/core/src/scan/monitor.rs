use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::scan::ScanError;

/// Host hooks polled once per scanned byte position.
pub trait ScanMonitor {
    /// Progress callback; `position` is the section offset being examined.
    fn report(&self, _position: usize, _address: u64) {}

    /// Returns `Err(ScanError::Cancelled)` once the host wants the run to stop.
    fn check_cancelled(&self) -> Result<(), ScanError>;
}

/// Monitor that reports nothing and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl ScanMonitor for NullMonitor {
    fn check_cancelled(&self) -> Result<(), ScanError> {
        Ok(())
    }
}

/// Shared cancellation flag; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ScanMonitor for CancellationToken {
    fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }
}
