use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rpcmap_core::model::{FunctionRecord, FunctionType};
use rpcmap_core::output::read_records;
use serde::Serialize;

use crate::commands::print_json;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleCounts {
    pub rpc_functions: usize,
    pub internal_calls: usize,
    pub external_calls: usize,
}

impl ModuleCounts {
    fn add(&mut self, function_type: FunctionType) {
        match function_type {
            FunctionType::RpcFunction => self.rpc_functions += 1,
            FunctionType::InternalFunction => self.internal_calls += 1,
            FunctionType::ExternalFunction => self.external_calls += 1,
        }
    }
}

/// Record counts of a JSON Lines output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub records: usize,
    pub totals: ModuleCounts,
    /// Keyed by the record's `Module` field.
    pub modules: BTreeMap<String, ModuleCounts>,
}

pub fn summarize_records(records: &[FunctionRecord]) -> RecordSummary {
    let mut summary = RecordSummary { records: records.len(), ..RecordSummary::default() };
    for record in records {
        summary.totals.add(record.function_type());
        summary.modules.entry(record.module().to_string()).or_default().add(record.function_type());
    }
    summary
}

/// Read a mapper output file back and print counts per function type and module.
pub fn summarize_command(input: &Path, json: bool) -> Result<()> {
    let records = read_records(input)
        .with_context(|| format!("Failed to read records from {}", input.display()))?;
    let summary = summarize_records(&records);
    if json {
        return print_json(&summary);
    }

    println!("Records ({}):", summary.records);
    println!("  {}: {}", FunctionType::RpcFunction.as_str(), summary.totals.rpc_functions);
    println!("  {}: {}", FunctionType::InternalFunction.as_str(), summary.totals.internal_calls);
    println!("  {}: {}", FunctionType::ExternalFunction.as_str(), summary.totals.external_calls);
    if summary.modules.is_empty() {
        println!("Modules: (none)");
        return Ok(());
    }
    println!("Modules ({}):", summary.modules.len());
    for (module, counts) in &summary.modules {
        println!(
            "  - {module}: rpc={} int={} ext={}",
            counts.rpc_functions, counts.internal_calls, counts.external_calls
        );
    }
    Ok(())
}
