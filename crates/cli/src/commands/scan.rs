use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rpcmap_core::config::MapperConfig;
use rpcmap_core::model::format_address;
use rpcmap_core::output::JsonLinesSink;
use rpcmap_core::scan::{ScanError, ScanMonitor};
use rpcmap_core::services::backends::{open_database, DatabaseSource};
use rpcmap_core::services::{MapReport, RpcMapper, ScanStats};
use serde::Serialize;

use crate::commands::{effective_config, print_json, ConfigOverrides};
use crate::progress::ProgressMonitor;
use crate::sha256_file;

/// Arguments of the `scan` subcommand.
#[derive(Debug, Clone, Default)]
pub struct ScanArgs {
    pub binaries: Vec<PathBuf>,
    pub exports: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    pub json: bool,
    pub progress: bool,
}

/// Outcome for one input of a scan run.
#[derive(Debug, Clone, Serialize)]
pub struct BinarySummary {
    pub path: String,
    pub backend: Option<String>,
    pub sha256: Option<String>,
    pub records_written: usize,
    /// Section-relative descriptor offsets, hex.
    pub interfaces: Vec<String>,
    pub stats: ScanStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub output: String,
    pub records_written: usize,
    pub binaries: Vec<BinarySummary>,
}

/// Map every input and append the records to the configured output.
pub fn scan_command(args: &ScanArgs) -> Result<()> {
    let config = effective_config(args.config.as_deref(), &args.overrides)?;
    let sources = collect_sources(args)?;
    let summary = run_scan(&config, &sources, args.progress, None)?;

    if args.json {
        return print_json(&summary);
    }
    for binary in &summary.binaries {
        print_binary_summary(binary);
    }
    println!("Wrote {} records to {}", summary.records_written, summary.output);
    Ok(())
}

fn collect_sources(args: &ScanArgs) -> Result<Vec<DatabaseSource>> {
    let sources: Vec<DatabaseSource> = args
        .binaries
        .iter()
        .cloned()
        .map(DatabaseSource::Binary)
        .chain(args.exports.iter().cloned().map(DatabaseSource::Export))
        .collect();
    if sources.is_empty() {
        return Err(anyhow!("Nothing to scan: pass at least one --binary or --export"));
    }
    Ok(sources)
}

/// Scan `sources` in order, appending each one's records as soon as it finishes.
///
/// A source that fails to load or scan is logged and skipped. When `cancel`
/// reports cancellation the whole run stops; records of finished sources are
/// already flushed to the output.
pub fn run_scan(
    config: &MapperConfig,
    sources: &[DatabaseSource],
    progress: bool,
    cancel: Option<&dyn ScanMonitor>,
) -> Result<ScanSummary> {
    let output = Path::new(&config.output);
    let mut sink = JsonLinesSink::open_append(output)
        .with_context(|| format!("Failed to open output {}", output.display()))?;

    let mut binaries = Vec::new();
    for source in sources {
        let path = source.path().display().to_string();
        let sha256 = match sha256_file(source.path()) {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!("[!] {err:#}");
                None
            }
        };
        let report = match map_source(config, source, progress, cancel) {
            Ok(report) => report,
            Err(err) if is_cancelled(&err) => return Err(err),
            Err(err) => {
                error!("[!] Skipping {path}: {err:#}");
                binaries.push(BinarySummary {
                    path,
                    backend: None,
                    sha256,
                    records_written: 0,
                    interfaces: Vec::new(),
                    stats: ScanStats::default(),
                    error: Some(format!("{err:#}")),
                });
                continue;
            }
        };

        let before = sink.written();
        let error = match sink.append_all(&report.records).and_then(|_| sink.flush()) {
            Ok(_) => None,
            Err(err) => {
                error!("[!] Failed to write records for {path}: {err}");
                Some(err.to_string())
            }
        };
        let records_written = sink.written() - before;
        info!("[*] {path}: {records_written} records appended to {}", output.display());

        binaries.push(BinarySummary {
            path,
            backend: Some(report.backend.clone()),
            sha256,
            records_written,
            interfaces: report.interfaces.iter().map(|c| format_address(c.offset as u64)).collect(),
            stats: report.stats,
            error,
        });
    }

    let records_written = sink
        .finish()
        .with_context(|| format!("Failed to flush output {}", output.display()))?;
    Ok(ScanSummary { output: config.output.clone(), records_written, binaries })
}

fn map_source(
    config: &MapperConfig,
    source: &DatabaseSource,
    progress: bool,
    cancel: Option<&dyn ScanMonitor>,
) -> Result<MapReport> {
    let path = source.path();
    let mut db = open_database(source, config)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let total = db.section(&config.data_section).map(|s| s.len() as u64).unwrap_or_default();
    let label = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let monitor = ProgressMonitor::new(total, &label, progress, cancel);

    info!("[*] Mapping {}", path.display());
    let result = RpcMapper::with_monitor(config, &monitor).run(db.as_mut());
    monitor.finish();
    result.with_context(|| format!("Failed to scan {}", path.display()))
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ScanError>(), Some(ScanError::Cancelled))
}

fn print_binary_summary(binary: &BinarySummary) {
    println!("{}", binary.path);
    if let Some(hash) = &binary.sha256 {
        println!("  SHA-256: {hash}");
    }
    if let Some(err) = &binary.error {
        println!("  Error: {err}");
        return;
    }
    let stats = &binary.stats;
    println!("  Backend: {}", binary.backend.as_deref().unwrap_or("-"));
    println!("  Interfaces: {}", stats.interfaces);
    println!("  Dispatch entries: {}", stats.dispatch_entries);
    println!(
        "  RPC functions: {} ({} created, {} unresolved)",
        stats.rpc_functions, stats.created_functions, stats.unresolved_entries
    );
    println!("  Call edges: {}", stats.call_edges);
    println!("  Records written: {}", binary.records_written);
}
