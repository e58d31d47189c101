use std::fs;
use std::path::{Path, PathBuf};

use predicates::prelude::*;
use tempfile::tempdir;

const DATA: u64 = 0x1_8000_3000;
const CODE: u64 = 0x1_8000_1000;

/// Program export with one interface exposing `RpcStart`, which calls a
/// helper and an import.
fn write_export(dir: &Path) -> PathBuf {
    let mut rdata = vec![0u8; 0x200];
    rdata[0x20..0x24].copy_from_slice(&0x80u32.to_le_bytes());
    rdata[0x50..0x58].copy_from_slice(&(DATA + 0x100).to_le_bytes());
    rdata[0x70..0x78].copy_from_slice(&(DATA + 0x140).to_le_bytes());
    rdata[0x100..0x104].copy_from_slice(&1u32.to_le_bytes());
    rdata[0x148..0x150].copy_from_slice(&(DATA + 0x180).to_le_bytes());
    rdata[0x180..0x188].copy_from_slice(&CODE.to_le_bytes());

    let export = serde_json::json!({
        "module": "C:\\Windows\\System32\\svc.dll",
        "sections": [
            { "name": ".rdata", "start": DATA, "bytes": hex_encode(&rdata) },
            { "name": ".text", "start": CODE, "bytes": "cc".repeat(0x100) }
        ],
        "functions": [
            { "address": CODE, "name": "RpcStart", "calls": [CODE + 0x40, CODE + 0x80] },
            { "address": CODE + 0x40, "name": "StartWorker", "calls": [] },
            { "address": CODE + 0x80, "name": "CreateThread", "library": "KERNEL32.DLL" }
        ]
    });
    let path = dir.join("svc.export.json");
    fs::write(&path, serde_json::to_string_pretty(&export).expect("encode")).expect("write export");
    path
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn rpcmap() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("rpcmap")
}

#[test]
fn scan_export_writes_json_lines() {
    let dir = tempdir().expect("tempdir");
    let export = write_export(dir.path());
    let out = dir.path().join("maps.json");

    rpcmap()
        .arg("scan")
        .arg("--export")
        .arg(&export)
        .arg("--output")
        .arg(&out)
        .arg("--no-progress")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 3 records"));

    let body = fs::read_to_string(&out).expect("read output");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        r#"{"Module":"C:/Windows/System32/svc.dll","FunctionType":"RPCFunction","FunctionName":"RpcStart","Address":"180001000","CalledByModule":"","CalledBy":""}"#
    );
    assert!(lines[1].contains(r#""FunctionName":"StartWorker","FunctionType":"IntFunction""#));
    assert!(lines[2].contains(r#""Module":"KERNEL32.DLL""#));
    assert!(lines[2].ends_with(r#""Address":"0"}"#));
}

#[test]
fn second_scan_appends_to_existing_output() {
    let dir = tempdir().expect("tempdir");
    let export = write_export(dir.path());
    let out = dir.path().join("maps.json");

    for _ in 0..2 {
        rpcmap()
            .args(["scan", "--no-progress", "--export"])
            .arg(&export)
            .arg("--output")
            .arg(&out)
            .assert()
            .success();
    }

    let body = fs::read_to_string(&out).expect("read output");
    assert_eq!(body.lines().count(), 6);
}

#[test]
fn scan_defaults_to_all_rpc_func_maps_in_cwd() {
    let dir = tempdir().expect("tempdir");
    let export = write_export(dir.path());

    rpcmap()
        .current_dir(dir.path())
        .args(["scan", "--no-progress", "--export"])
        .arg(&export)
        .assert()
        .success();

    assert!(dir.path().join("AllRpcFuncMaps.json").is_file());
}

#[test]
fn scan_json_summary_reports_stats() {
    let dir = tempdir().expect("tempdir");
    let export = write_export(dir.path());
    let out = dir.path().join("maps.json");

    let output = rpcmap()
        .args(["scan", "--json", "--no-progress", "--max-depth", "1", "--export"])
        .arg(&export)
        .arg("--output")
        .arg(&out)
        .output()
        .expect("run scan");
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json summary");
    assert_eq!(summary["records_written"], 3);
    let binary = &summary["binaries"][0];
    assert_eq!(binary["backend"], "memory");
    assert_eq!(binary["interfaces"][0], "20");
    assert_eq!(binary["stats"]["rpc_functions"], 1);
    assert_eq!(binary["stats"]["call_edges"], 2);
    assert_eq!(binary["sha256"].as_str().map(str::len), Some(64));
}

#[test]
fn unreadable_input_is_skipped_and_others_still_scanned() {
    let dir = tempdir().expect("tempdir");
    let export = write_export(dir.path());
    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json").expect("write broken export");
    let out = dir.path().join("maps.json");

    rpcmap()
        .args(["scan", "--no-progress", "--export"])
        .arg(&broken)
        .arg("--export")
        .arg(&export)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Error:"))
        .stdout(predicate::str::contains("Wrote 3 records"));
}

#[test]
fn scan_without_inputs_fails() {
    let dir = tempdir().expect("tempdir");
    rpcmap()
        .current_dir(dir.path())
        .arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to scan"));
}

#[test]
fn show_config_prints_defaults_and_file_values() {
    rpcmap()
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Output: AllRpcFuncMaps.json"))
        .stdout(predicate::str::contains("Max depth: 5"));

    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("rpcmap.yaml");
    fs::write(&config, "max_depth: 2\ndedupe_callees: true\n").expect("write config");
    let output = rpcmap()
        .arg("show-config")
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .output()
        .expect("run show-config");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json config");
    assert_eq!(value["max_depth"], 2);
    assert_eq!(value["dedupe_callees"], true);
    assert_eq!(value["data_section"], ".rdata");
}

#[test]
fn show_config_rejects_unknown_format() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("rpcmap.ini");
    fs::write(&config, "max_depth=2").expect("write config");
    rpcmap()
        .arg("show-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported config format"));
}

#[test]
fn summarize_counts_records_by_type() {
    let dir = tempdir().expect("tempdir");
    let export = write_export(dir.path());
    let out = dir.path().join("maps.json");
    rpcmap()
        .args(["scan", "--no-progress", "--export"])
        .arg(&export)
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    rpcmap()
        .arg("summarize")
        .arg("--input")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Records (3):"))
        .stdout(predicate::str::contains("RPCFunction: 1"))
        .stdout(predicate::str::contains("ExtFunction: 1"))
        .stdout(predicate::str::contains("KERNEL32.DLL: rpc=0 int=0 ext=1"));
}

#[test]
fn summarize_missing_input_fails() {
    let dir = tempdir().expect("tempdir");
    rpcmap()
        .arg("summarize")
        .arg("--input")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read records"));
}
