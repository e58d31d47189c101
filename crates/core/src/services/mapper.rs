use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::{
    resolve_entry, AnalysisDatabase, BridgeError, CallGraphWalker, EntryResolution, FunctionHandle,
    WalkStats,
};
use crate::config::MapperConfig;
use crate::model::{FunctionRecord, FunctionType, RecordLog, UNRESOLVED_FUNCTION_NAME};
use crate::scan::{
    routine_entries, DispatchEntry, InterfaceCandidate, InterfaceScanner, NullMonitor, ScanError,
    ScanMonitor,
};

/// Counters describing one mapping run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub positions_scanned: u64,
    pub interfaces: u64,
    pub dispatch_entries: u64,
    pub rpc_functions: u64,
    pub created_functions: u64,
    pub unresolved_entries: u64,
    pub call_edges: u64,
    pub unresolved_callees: u64,
    pub skipped_edges: u64,
}

impl ScanStats {
    fn absorb_walk(&mut self, walk: WalkStats) {
        self.call_edges += walk.edges;
        self.unresolved_callees += walk.unresolved_callees;
        self.skipped_edges += walk.skipped_edges;
    }
}

/// Result of mapping one binary: records in discovery order plus counters.
#[derive(Debug, Clone, Default)]
pub struct MapReport {
    pub backend: String,
    pub records: RecordLog,
    pub interfaces: Vec<InterfaceCandidate>,
    pub stats: ScanStats,
}

impl MapReport {
    pub fn rpc_functions(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.records.iter().filter(|r| r.function_type() == FunctionType::RpcFunction)
    }
}

/// Drives the scan: descriptors -> dispatch entries -> functions -> call graph.
pub struct RpcMapper<'a> {
    pub config: &'a MapperConfig,
    pub monitor: &'a dyn ScanMonitor,
}

impl<'a> RpcMapper<'a> {
    pub fn new(config: &'a MapperConfig) -> Self {
        Self { config, monitor: &NullMonitor }
    }

    pub fn with_monitor(config: &'a MapperConfig, monitor: &'a dyn ScanMonitor) -> Self {
        Self { config, monitor }
    }

    /// Map every RPC interface found in `db`'s data section.
    ///
    /// Only cancellation and missing sections abort the run; bad candidates and
    /// unresolvable entries are skipped.
    pub fn run(&self, db: &mut dyn AnalysisDatabase) -> Result<MapReport, ScanError> {
        let data = db
            .section(&self.config.data_section)
            .ok_or_else(|| ScanError::MissingSection(self.config.data_section.clone()))?;
        let code = db
            .section(&self.config.code_section)
            .ok_or_else(|| ScanError::MissingSection(self.config.code_section.clone()))?
            .range();
        info!(
            "[*] Scanning {} ({:#x}-{:#x}) with {} backend",
            data.name(),
            data.range().start,
            data.range().end(),
            db.backend_name()
        );

        let mut report = MapReport { backend: db.backend_name().to_string(), ..MapReport::default() };
        let mut scanner = InterfaceScanner::new(&data, self.config.limits, self.monitor);
        for candidate in scanner.by_ref() {
            let candidate = candidate?;
            report.stats.interfaces += 1;
            report.interfaces.push(candidate);
            for entry in routine_entries(&candidate, &data, code) {
                report.stats.dispatch_entries += 1;
                self.map_entry(db, entry, &mut report);
            }
        }
        report.stats.positions_scanned = scanner.positions_scanned();

        info!(
            "[*] Found {} interfaces, {} RPC functions, {} call edges",
            report.stats.interfaces, report.stats.rpc_functions, report.stats.call_edges
        );
        Ok(report)
    }

    fn map_entry(&self, db: &mut dyn AnalysisDatabase, entry: DispatchEntry, report: &mut MapReport) {
        let resolution = resolve_entry(db, entry.address);
        let Some(handle) = resolution.handle() else {
            report.stats.unresolved_entries += 1;
            return;
        };
        if matches!(resolution, EntryResolution::Created(_)) {
            report.stats.created_functions += 1;
        }

        let record = match entry_record(&*db, handle) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    "[!] UNRESOLVED RPC function {UNRESOLVED_FUNCTION_NAME},{:x} ({err})",
                    entry.address
                );
                report.stats.unresolved_entries += 1;
                return;
            }
        };
        if matches!(resolution, EntryResolution::Existing(_)) {
            info!("[*] Found RPC function {} at {:x}", record.function_name(), entry.address);
        }
        debug!("Dispatch slot {} -> {}", entry.index, record.function_name());
        report.records.push(record);
        report.stats.rpc_functions += 1;

        let walker = CallGraphWalker::new(&*db, self.config.walk_options());
        let walk = walker.walk(handle, &mut report.records);
        report.stats.absorb_walk(walk);
    }
}

fn entry_record(db: &dyn AnalysisDatabase, handle: FunctionHandle) -> Result<FunctionRecord, BridgeError> {
    let module = db.owning_module_path(handle)?;
    let name = db.name(handle)?;
    let address = db.entry_point(handle)?;
    Ok(FunctionRecord::rpc_entry(&module, name, address))
}
