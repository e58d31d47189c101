//! Function resolution and call-graph expansion.
//!
//! The mapper never inspects machine code itself. Everything it knows about
//! functions comes through [`AnalysisDatabase`], which a disassembler (or a
//! recorded export of one) implements.

pub mod walker;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::SectionBytes;

pub use walker::{CallGraphEdge, CallGraphWalker, WalkOptions, WalkStats, MAX_DEPTH};

/// Opaque key for a function known to an [`AnalysisDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionHandle(pub u64);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unknown function {0:#x}")]
    UnknownFunction(u64),
    #[error("Function {0:#x} is not external")]
    NotExternal(u64),
    #[error("Failed to create function at {address:#x}: {reason}")]
    Creation { address: u64, reason: String },
    #[error("Analysis backend error: {0}")]
    Backend(String),
}

/// Operations the mapper needs from the analysis engine that owns the binary.
pub trait AnalysisDatabase {
    /// Human-readable backend name for logs and summaries.
    fn backend_name(&self) -> &'static str;

    /// Bytes and address range of the named memory block.
    fn section(&self, name: &str) -> Option<SectionBytes>;

    fn function_at(&self, address: u64) -> Option<FunctionHandle>;

    fn symbol_exists_at(&self, address: u64) -> bool;

    /// Define a function at `address`. Only attempted when a symbol exists there.
    fn create_function(&mut self, address: u64) -> Result<FunctionHandle, BridgeError>;

    /// Direct callees of `function`, each listed once.
    fn called_functions(&self, function: FunctionHandle) -> Result<Vec<FunctionHandle>, BridgeError>;

    fn is_external(&self, function: FunctionHandle) -> bool;

    /// Import library of an external function.
    fn library_name(&self, function: FunctionHandle) -> Result<String, BridgeError>;

    fn entry_point(&self, function: FunctionHandle) -> Result<u64, BridgeError>;

    fn name(&self, function: FunctionHandle) -> Result<String, BridgeError>;

    /// Path of the binary that defines `function`.
    fn owning_module_path(&self, function: FunctionHandle) -> Result<String, BridgeError>;
}

/// Outcome of resolving one routine pointer from a dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryResolution {
    Existing(FunctionHandle),
    Created(FunctionHandle),
    Unresolved,
}

impl EntryResolution {
    pub fn handle(&self) -> Option<FunctionHandle> {
        match self {
            EntryResolution::Existing(h) | EntryResolution::Created(h) => Some(*h),
            EntryResolution::Unresolved => None,
        }
    }
}

/// Resolve a dispatch entry: an existing function, else a function created
/// over an existing symbol, else unresolved.
pub fn resolve_entry(db: &mut dyn AnalysisDatabase, address: u64) -> EntryResolution {
    if let Some(handle) = db.function_at(address) {
        return EntryResolution::Existing(handle);
    }
    if !db.symbol_exists_at(address) {
        warn!("[!] Could not find function {address:x}");
        return EntryResolution::Unresolved;
    }
    info!("[*] Creating function at {address:x}");
    match db.create_function(address) {
        Ok(handle) => {
            let name = db.name(handle).unwrap_or_else(|_| format!("{address:x}"));
            info!("[*] Function created with name {name}");
            EntryResolution::Created(handle)
        }
        Err(err) => {
            warn!("[!] Could not create function at {address:x}: {err}");
            EntryResolution::Unresolved
        }
    }
}
