use std::fs;

use rpcmap_core::analysis::AnalysisDatabase;
use rpcmap_core::config::MapperConfig;
use rpcmap_core::services::backends::{
    open_database, DatabaseSource, FunctionExport, InMemoryDatabase, ProgramExport, SectionExport,
    SymbolExport,
};
use rpcmap_core::services::RpcMapper;
use rpcmap_core::version;
use tempfile::tempdir;

#[test]
fn version_is_non_empty() {
    let v = version();
    assert!(!v.is_empty());
}

fn sample_export() -> ProgramExport {
    let data = 0x2000u64;
    let mut rdata = vec![0u8; 0x100];
    rdata[0x08..0x0C].copy_from_slice(&0x40u32.to_le_bytes());
    rdata[0x38..0x40].copy_from_slice(&(data + 0x80).to_le_bytes());
    rdata[0x58..0x60].copy_from_slice(&(data + 0x90).to_le_bytes());
    rdata[0x80..0x84].copy_from_slice(&2u32.to_le_bytes());
    rdata[0x98..0xA0].copy_from_slice(&(data + 0xC0).to_le_bytes());
    rdata[0xC0..0xC8].copy_from_slice(&0x1000u64.to_le_bytes());
    rdata[0xC8..0xD0].copy_from_slice(&0x1040u64.to_le_bytes());

    ProgramExport {
        module: "C:\\Windows\\System32\\export.dll".into(),
        sections: vec![
            SectionExport { name: ".rdata".into(), start: data, bytes: hex::encode(&rdata) },
            SectionExport { name: ".text".into(), start: 0x1000, bytes: "cc".repeat(0x100) },
        ],
        functions: vec![
            FunctionExport { address: 0x1000, name: "RpcQuery".into(), calls: vec![0x1080], library: None },
            FunctionExport {
                address: 0x1080,
                name: "RegQueryValueExW".into(),
                calls: vec![],
                library: Some("ADVAPI32.dll".into()),
            },
        ],
        symbols: vec![SymbolExport { address: 0x1040, name: "RpcSet".into() }],
    }
}

#[test]
fn program_export_round_trips_through_disk() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("export.json");
    fs::write(&path, serde_json::to_string_pretty(&sample_export()).expect("encode"))
        .expect("write export");

    let mut db = open_database(&DatabaseSource::Export(path), &MapperConfig::default())
        .expect("open export");
    assert_eq!(db.backend_name(), "memory");

    let config = MapperConfig::default();
    let report = RpcMapper::new(&config).run(db.as_mut()).expect("mapping succeeds");
    let names: Vec<&str> = report.records.iter().map(|r| r.function_name()).collect();
    assert_eq!(names, vec!["RpcQuery", "RegQueryValueExW", "RpcSet"]);
    assert_eq!(report.stats.created_functions, 1);
    assert_eq!(report.records.as_slice()[1].module(), "ADVAPI32.dll");
}

#[test]
fn missing_export_file_is_reported() {
    let dir = tempdir().expect("tempdir");
    let result = InMemoryDatabase::load(&dir.path().join("none.json"));
    assert!(result.is_err());
}
