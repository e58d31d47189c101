use log::debug;
use serde::{Deserialize, Serialize};

use crate::scan::monitor::ScanMonitor;
use crate::scan::section::SectionBytes;
use crate::scan::ScanError;

/// Offset of the dispatch-table pointer inside a 64-bit server interface descriptor.
pub const DISPATCH_TABLE_FIELD: usize = 0x30;
/// Offset of the interpreter-info pointer inside a 64-bit server interface descriptor.
pub const INTERPRETER_INFO_FIELD: usize = 0x50;
/// Offset of the server-routine-table pointer inside the interpreter-info structure.
pub const ROUTINE_TABLE_FIELD: u64 = 8;
/// A position is only probed while at least this many bytes remain.
pub const MIN_REMAINING_BYTES: usize = 9;

/// Upper bounds applied to a candidate's size and dispatch count (both exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLimits {
    #[serde(default = "default_max_struct_size")]
    pub max_struct_size: u32,
    #[serde(default = "default_max_dispatch_count")]
    pub max_dispatch_count: u32,
}

fn default_max_struct_size() -> u32 {
    0x100
}

fn default_max_dispatch_count() -> u32 {
    500
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_struct_size: default_max_struct_size(),
            max_dispatch_count: default_max_dispatch_count(),
        }
    }
}

/// A position in the data section that passed every interface heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceCandidate {
    /// Section-relative offset of the descriptor.
    pub offset: usize,
    pub struct_size: u32,
    pub dispatch_table: u64,
    pub interpreter_info: u64,
    pub server_routine_table: u64,
    /// Routine count read from the head of the dispatch table.
    pub dispatch_count: u32,
}

/// Test the descriptor heuristic at section offset `offset`.
///
/// Returns `None` for anything implausible; garbage input is never an error.
pub fn probe_candidate(
    section: &SectionBytes,
    offset: usize,
    limits: &ScanLimits,
) -> Option<InterfaceCandidate> {
    let struct_size = section.read_le(offset, 4) as u32;
    let dispatch_table = section.read_le(offset.saturating_add(DISPATCH_TABLE_FIELD), 8);
    let interpreter_info = section.read_le(offset.saturating_add(INTERPRETER_INFO_FIELD), 8);
    // The routine table pointer lives inside the interpreter-info structure.
    let server_routine_table = interpreter_info
        .checked_sub(section.start())
        .and_then(|rel| rel.checked_add(ROUTINE_TABLE_FIELD))
        .and_then(|rel| usize::try_from(rel).ok())
        .map(|rel| section.read_le(rel, 8))
        .unwrap_or(0);

    // Fields are signed on the wire; non-positive values are never valid.
    if (struct_size as i32) <= 0
        || (dispatch_table as i64) <= 0
        || (interpreter_info as i64) <= 0
        || (server_routine_table as i64) <= 0
    {
        return None;
    }
    if struct_size >= limits.max_struct_size
        || !section.contains(dispatch_table)
        || !section.contains(interpreter_info)
        || !section.contains(server_routine_table)
    {
        return None;
    }

    let dispatch_count = section.read_le_at(dispatch_table, 4) as u32;
    if dispatch_count >= limits.max_dispatch_count {
        debug!(
            "Rejected interface candidate at {:#x}: dispatch count {dispatch_count} too large",
            section.start().saturating_add(offset as u64)
        );
        return None;
    }

    Some(InterfaceCandidate {
        offset,
        struct_size,
        dispatch_table,
        interpreter_info,
        server_routine_table,
        dispatch_count,
    })
}

/// Single forward pass over a data section yielding accepted candidates.
///
/// After an accepted candidate at `i` the next position probed is
/// `i + struct_size`; after a rejection it is `i + 1`. Cancellation is yielded
/// once as `Err(ScanError::Cancelled)` and ends the pass.
pub struct InterfaceScanner<'a> {
    section: &'a SectionBytes,
    limits: ScanLimits,
    monitor: &'a dyn ScanMonitor,
    cursor: usize,
    positions_scanned: u64,
    finished: bool,
}

impl<'a> InterfaceScanner<'a> {
    pub fn new(section: &'a SectionBytes, limits: ScanLimits, monitor: &'a dyn ScanMonitor) -> Self {
        Self { section, limits, monitor, cursor: 0, positions_scanned: 0, finished: false }
    }

    /// Number of byte positions probed so far.
    pub fn positions_scanned(&self) -> u64 {
        self.positions_scanned
    }
}

impl Iterator for InterfaceScanner<'_> {
    type Item = Result<InterfaceCandidate, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        while self.cursor.saturating_add(MIN_REMAINING_BYTES) <= self.section.len() {
            let position = self.cursor;
            self.monitor.report(position, self.section.start().saturating_add(position as u64));
            if let Err(err) = self.monitor.check_cancelled() {
                self.finished = true;
                return Some(Err(err));
            }
            self.positions_scanned += 1;

            match probe_candidate(self.section, position, &self.limits) {
                Some(candidate) => {
                    debug!(
                        "Interface candidate at {:#x}: size={:#x} dispatch={:#x} routines={:#x} count={}",
                        self.section.start().saturating_add(position as u64),
                        candidate.struct_size,
                        candidate.dispatch_table,
                        candidate.server_routine_table,
                        candidate.dispatch_count
                    );
                    self.cursor = position.saturating_add(candidate.struct_size as usize);
                    return Some(Ok(candidate));
                }
                None => self.cursor += 1,
            }
        }
        self.finished = true;
        None
    }
}
