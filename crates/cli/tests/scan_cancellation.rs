use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use rpcmap::commands::run_scan;
use rpcmap_core::config::MapperConfig;
use rpcmap_core::scan::{ScanError, ScanMonitor};
use rpcmap_core::services::backends::DatabaseSource;
use tempfile::tempdir;

const DATA: u64 = 0x1_8000_3000;
const CODE: u64 = 0x1_8000_1000;
const RDATA_LEN: usize = 0x200;

/// Export of `module` with one interface whose routine calls a helper and an import.
fn write_export(dir: &Path, file: &str, module: &str) -> PathBuf {
    let mut rdata = vec![0u8; RDATA_LEN];
    rdata[0x20..0x24].copy_from_slice(&0x80u32.to_le_bytes());
    rdata[0x50..0x58].copy_from_slice(&(DATA + 0x100).to_le_bytes());
    rdata[0x70..0x78].copy_from_slice(&(DATA + 0x140).to_le_bytes());
    rdata[0x100..0x104].copy_from_slice(&1u32.to_le_bytes());
    rdata[0x148..0x150].copy_from_slice(&(DATA + 0x180).to_le_bytes());
    rdata[0x180..0x188].copy_from_slice(&CODE.to_le_bytes());

    let export = serde_json::json!({
        "module": module,
        "sections": [
            { "name": ".rdata", "start": DATA, "bytes": rdata.iter().map(|b| format!("{b:02x}")).collect::<String>() },
            { "name": ".text", "start": CODE, "bytes": "cc".repeat(0x100) }
        ],
        "functions": [
            { "address": CODE, "name": "RpcStart", "calls": [CODE + 0x40, CODE + 0x80] },
            { "address": CODE + 0x40, "name": "StartWorker", "calls": [] },
            { "address": CODE + 0x80, "name": "CreateThread", "library": "KERNEL32.DLL" }
        ]
    });
    let path = dir.join(file);
    fs::write(&path, serde_json::to_string(&export).expect("encode")).expect("write export");
    path
}

/// Cancels once more than `budget` scan positions have been checked.
struct CancelAfter {
    budget: Cell<usize>,
}

impl ScanMonitor for CancelAfter {
    fn check_cancelled(&self) -> Result<(), ScanError> {
        match self.budget.get() {
            0 => Err(ScanError::Cancelled),
            left => {
                self.budget.set(left - 1);
                Ok(())
            }
        }
    }
}

#[test]
fn cancellation_stops_the_run_and_keeps_finished_binaries() {
    let dir = tempdir().expect("tempdir");
    let first = write_export(dir.path(), "first.json", "C:\\svc\\first.dll");
    let second = write_export(dir.path(), "second.json", "C:\\svc\\second.dll");
    let third = write_export(dir.path(), "third.json", "C:\\svc\\third.dll");
    let out = dir.path().join("maps.json");
    let config = MapperConfig { output: out.display().to_string(), ..MapperConfig::default() };
    let sources =
        vec![DatabaseSource::Export(first), DatabaseSource::Export(second), DatabaseSource::Export(third)];

    // One export probes fewer than RDATA_LEN positions, so this runs out inside the second.
    let cancel = CancelAfter { budget: Cell::new(RDATA_LEN) };
    let err = run_scan(&config, &sources, false, Some(&cancel)).unwrap_err();
    assert!(
        matches!(err.downcast_ref::<ScanError>(), Some(ScanError::Cancelled)),
        "unexpected error: {err:#}"
    );

    let body = fs::read_to_string(&out).expect("read output");
    assert_eq!(body.lines().count(), 3);
    assert!(body.lines().all(|line| line.contains("C:/svc/first.dll")));
}

#[test]
fn run_without_cancellation_scans_every_source() {
    let dir = tempdir().expect("tempdir");
    let first = write_export(dir.path(), "first.json", "C:\\svc\\first.dll");
    let second = write_export(dir.path(), "second.json", "C:\\svc\\second.dll");
    let out = dir.path().join("maps.json");
    let config = MapperConfig { output: out.display().to_string(), ..MapperConfig::default() };
    let sources = vec![DatabaseSource::Export(first), DatabaseSource::Export(second)];

    let summary = run_scan(&config, &sources, false, None).expect("scan succeeds");
    assert_eq!(summary.records_written, 6);
    assert_eq!(summary.binaries.len(), 2);
    assert!(summary.binaries.iter().all(|b| b.error.is_none() && b.records_written == 3));
}
