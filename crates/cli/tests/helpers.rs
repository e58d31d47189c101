use std::fs;

use rpcmap::commands::{effective_config, summarize_records, ConfigOverrides};
use rpcmap::{init_logging, sha256_file};
use rpcmap_core::model::FunctionRecord;
use tempfile::tempdir;

#[test]
fn sha256_file_matches_known_digest() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("abc.bin");
    fs::write(&path, b"abc").expect("write");
    assert_eq!(
        sha256_file(&path).expect("hash"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn sha256_file_errors_for_missing_file() {
    let dir = tempdir().expect("tempdir");
    let err = sha256_file(&dir.path().join("missing.bin")).unwrap_err();
    assert!(err.to_string().contains("Failed to open binary for hashing"));
}

#[test]
fn init_logging_can_be_called_twice() {
    init_logging("warn");
    init_logging("debug");
}

#[test]
fn overrides_win_over_config_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("rpcmap.json");
    fs::write(&path, r#"{"max_depth": 2, "output": "from-file.json"}"#).expect("write");

    let overrides = ConfigOverrides {
        output: Some("from-cli.json".into()),
        code_section: Some(".text2".into()),
        dedupe: true,
        ..ConfigOverrides::default()
    };
    let config = effective_config(Some(&path), &overrides).expect("config");
    assert_eq!(config.max_depth, 2);
    assert_eq!(config.output, "from-cli.json");
    assert_eq!(config.code_section, ".text2");
    assert!(config.dedupe_callees);
}

#[test]
fn empty_override_is_rejected() {
    let overrides = ConfigOverrides { data_section: Some(String::new()), ..ConfigOverrides::default() };
    let err = effective_config(None, &overrides).unwrap_err();
    assert!(format!("{err:#}").contains("data_section"), "unexpected error: {err:#}");
}

#[test]
fn summarize_records_groups_by_module() {
    let records = vec![
        FunctionRecord::rpc_entry("svc.dll", "RpcA", 0x1000),
        FunctionRecord::internal_call("svc.dll", "Helper", 0x1100, "svc.dll", "RpcA"),
        FunctionRecord::external_call("ntdll.dll", "NtClose", "svc.dll", "Helper"),
        FunctionRecord::external_call("ntdll.dll", "NtClose", "svc.dll", "RpcA"),
    ];
    let summary = summarize_records(&records);
    assert_eq!(summary.records, 4);
    assert_eq!(summary.totals.external_calls, 2);
    assert_eq!(summary.modules["svc.dll"].rpc_functions, 1);
    assert_eq!(summary.modules["svc.dll"].internal_calls, 1);
    assert_eq!(summary.modules["ntdll.dll"].external_calls, 2);
}
