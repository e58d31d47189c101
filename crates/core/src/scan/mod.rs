//! Heuristic scanning of data-section bytes for RPC server interface descriptors.
//!
//! Nothing here parses a documented format. A position is treated as an
//! interface descriptor when its size field and the pointers at fixed offsets
//! look plausible for the 64-bit in-memory layout; everything else is skipped.

pub mod dispatch;
pub mod fields;
pub mod interface;
pub mod monitor;
pub mod section;

use thiserror::Error;

use crate::analysis::BridgeError;

pub use dispatch::{routine_entries, DispatchEntry};
pub use interface::{probe_candidate, InterfaceCandidate, InterfaceScanner, ScanLimits};
pub use monitor::{CancellationToken, NullMonitor, ScanMonitor};
pub use section::{AddressRange, SectionBytes};

#[derive(Debug, Error)]
pub enum ScanError {
    /// The host asked the scan to stop.
    #[error("Scan cancelled")]
    Cancelled,
    #[error("Section not found: {0}")]
    MissingSection(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
