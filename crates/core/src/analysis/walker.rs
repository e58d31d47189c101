use std::collections::HashSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisDatabase, BridgeError, FunctionHandle};
use crate::model::{FunctionRecord, RecordLog, UNRESOLVED_FUNCTION_NAME};

/// Default number of call hops followed from an RPC entry function.
pub const MAX_DEPTH: u32 = 5;

/// One caller -> callee hop. `depth` is the caller's distance from the RPC entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallGraphEdge {
    pub caller: FunctionHandle,
    pub callee: FunctionHandle,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkOptions {
    /// Edges are emitted for hops `1..=max_depth`.
    pub max_depth: u32,
    /// Emit and expand each function at most once per RPC entry.
    ///
    /// Off by default: functions reached through several paths, or inside a
    /// cycle, are re-emitted every time they are reached.
    pub dedupe: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self { max_depth: MAX_DEPTH, dedupe: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkStats {
    pub edges: u64,
    pub unresolved_callees: u64,
    pub skipped_edges: u64,
}

struct Frame {
    function: FunctionHandle,
    depth: u32,
    name: String,
    module: String,
    callees: std::vec::IntoIter<FunctionHandle>,
}

/// Depth-bounded expansion of callees from one RPC entry function.
///
/// Uses an explicit stack, so record order matches a recursive depth-first
/// walk: each callee's record is followed by the records of its own callees
/// before the next sibling is visited.
pub struct CallGraphWalker<'a> {
    db: &'a dyn AnalysisDatabase,
    options: WalkOptions,
}

impl<'a> CallGraphWalker<'a> {
    pub fn new(db: &'a dyn AnalysisDatabase, options: WalkOptions) -> Self {
        Self { db, options }
    }

    /// Append one record per edge reachable from `root` to `records`.
    pub fn walk(&self, root: FunctionHandle, records: &mut RecordLog) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        if self.options.dedupe {
            visited.insert(root);
        }
        let root_name = self.display_name(root, &mut stats);
        if let Some(frame) = self.open_frame(root, 0, root_name) {
            stack.push(frame);
        }

        while let Some(frame) = stack.last_mut() {
            let Some(callee) = frame.callees.next() else {
                stack.pop();
                continue;
            };
            if self.options.dedupe && !visited.insert(callee) {
                continue;
            }
            let edge = CallGraphEdge { caller: frame.function, callee, depth: frame.depth };
            let callee_name = match self.edge_record(&edge, &frame.module, &frame.name, &mut stats) {
                Ok(record) => {
                    let name = record.function_name().to_string();
                    records.push(record);
                    stats.edges += 1;
                    name
                }
                Err(err) => {
                    warn!("    [!] Skipping call {} -> {:#x}: {err}", frame.name, callee.0);
                    stats.skipped_edges += 1;
                    continue;
                }
            };

            let next_depth = edge.depth + 1;
            if next_depth < self.options.max_depth {
                if let Some(next) = self.open_frame(callee, next_depth, callee_name) {
                    stack.push(next);
                }
            }
        }

        stats
    }

    fn open_frame(&self, function: FunctionHandle, depth: u32, name: String) -> Option<Frame> {
        if depth >= self.options.max_depth {
            return None;
        }
        let module = match self.db.owning_module_path(function) {
            Ok(module) => module,
            Err(err) => {
                warn!("  [!] Cannot expand {name}: {err}");
                return None;
            }
        };
        debug!("  [+] Getting Functions called by {name}");
        let callees = match self.db.called_functions(function) {
            Ok(callees) => callees,
            Err(err) => {
                warn!("  [!] Failed to list callees of {name}: {err}");
                return None;
            }
        };
        Some(Frame { function, depth, name, module, callees: callees.into_iter() })
    }

    fn edge_record(
        &self,
        edge: &CallGraphEdge,
        caller_module: &str,
        caller_name: &str,
        stats: &mut WalkStats,
    ) -> Result<FunctionRecord, BridgeError> {
        let callee = edge.callee;
        let name = self.display_name(callee, stats);
        debug!("    [>] Processing Called Function {name}");
        if self.db.is_external(callee) {
            let library = self.db.library_name(callee)?;
            Ok(FunctionRecord::external_call(&library, name, caller_module, caller_name))
        } else {
            let module = self.db.owning_module_path(callee)?;
            let address = self.db.entry_point(callee)?;
            Ok(FunctionRecord::internal_call(&module, name, address, caller_module, caller_name))
        }
    }

    fn display_name(&self, function: FunctionHandle, stats: &mut WalkStats) -> String {
        match self.db.name(function) {
            Ok(name) => name,
            Err(err) => {
                debug!("Unresolved name for {:#x}: {err}", function.0);
                stats.unresolved_callees += 1;
                UNRESOLVED_FUNCTION_NAME.to_string()
            }
        }
    }
}
