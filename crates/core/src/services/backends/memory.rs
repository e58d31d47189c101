use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisDatabase, BridgeError, FunctionHandle};
use crate::scan::SectionBytes;
use crate::services::backends::BackendError;

/// Program snapshot exported from another disassembler.
///
/// ```json
/// {
///   "module": "C:/Windows/System32/svc.dll",
///   "sections": [{ "name": ".rdata", "start": 8192, "bytes": "0000..." }],
///   "functions": [{ "address": 4096, "name": "RpcOpen", "calls": [4352] },
///                 { "address": 4352, "name": "CreateFileW", "library": "KERNEL32.DLL" }],
///   "symbols": [{ "address": 4608, "name": "RpcClose" }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramExport {
    pub module: String,
    #[serde(default)]
    pub sections: Vec<SectionExport>,
    #[serde(default)]
    pub functions: Vec<FunctionExport>,
    #[serde(default)]
    pub symbols: Vec<SymbolExport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionExport {
    pub name: String,
    pub start: u64,
    /// Section contents as a hex string.
    pub bytes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionExport {
    pub address: u64,
    pub name: String,
    /// Entry addresses of direct callees.
    #[serde(default)]
    pub calls: Vec<u64>,
    /// Import library, for functions resolved through the import table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolExport {
    pub address: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionEntry {
    name: String,
    calls: Vec<u64>,
    library: Option<String>,
}

/// [`AnalysisDatabase`] backed by plain data, either built in code or loaded
/// from a [`ProgramExport`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    module: String,
    sections: Vec<SectionBytes>,
    functions: BTreeMap<u64, FunctionEntry>,
    symbols: BTreeMap<u64, String>,
}

impl InMemoryDatabase {
    pub fn new(module: impl Into<String>) -> Self {
        Self { module: module.into(), ..Self::default() }
    }

    pub fn with_section(mut self, name: impl Into<String>, start: u64, bytes: Vec<u8>) -> Self {
        self.sections.push(SectionBytes::new(name, start, bytes));
        self
    }

    /// Internal function at `address` calling the functions at `calls`.
    pub fn with_function(mut self, address: u64, name: impl Into<String>, calls: &[u64]) -> Self {
        self.functions.insert(
            address,
            FunctionEntry { name: name.into(), calls: calls.to_vec(), library: None },
        );
        self
    }

    /// Imported function reachable at `address` (thunk or import slot).
    pub fn with_import(
        mut self,
        address: u64,
        library: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.functions.insert(
            address,
            FunctionEntry { name: name.into(), calls: Vec::new(), library: Some(library.into()) },
        );
        self
    }

    /// Symbol with no function defined over it yet.
    pub fn with_symbol(mut self, address: u64, name: impl Into<String>) -> Self {
        self.symbols.insert(address, name.into());
        self
    }

    pub fn from_export(export: ProgramExport) -> Result<Self, BackendError> {
        let mut db = Self::new(export.module);
        for section in export.sections {
            let bytes = hex::decode(section.bytes.trim()).map_err(|e| {
                BackendError::Parse(format!("section {} has invalid hex bytes: {e}", section.name))
            })?;
            db = db.with_section(section.name, section.start, bytes);
        }
        for func in export.functions {
            db.functions.insert(
                func.address,
                FunctionEntry { name: func.name, calls: func.calls, library: func.library },
            );
        }
        for sym in export.symbols {
            db.symbols.insert(sym.address, sym.name);
        }
        Ok(db)
    }

    /// Load a JSON [`ProgramExport`] from disk.
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        if !path.is_file() {
            return Err(BackendError::MissingBinary(path.to_path_buf()));
        }
        let body = fs::read_to_string(path)
            .map_err(|source| BackendError::Io { path: path.to_path_buf(), source })?;
        let export: ProgramExport = serde_json::from_str(&body)
            .map_err(|e| BackendError::Parse(format!("failed to parse program export: {e}")))?;
        Self::from_export(export)
    }

    fn entry(&self, function: FunctionHandle) -> Result<&FunctionEntry, BridgeError> {
        self.functions.get(&function.0).ok_or(BridgeError::UnknownFunction(function.0))
    }
}

impl AnalysisDatabase for InMemoryDatabase {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn section(&self, name: &str) -> Option<SectionBytes> {
        self.sections.iter().find(|s| s.name() == name).cloned()
    }

    fn function_at(&self, address: u64) -> Option<FunctionHandle> {
        self.functions.contains_key(&address).then_some(FunctionHandle(address))
    }

    fn symbol_exists_at(&self, address: u64) -> bool {
        self.symbols.contains_key(&address)
    }

    fn create_function(&mut self, address: u64) -> Result<FunctionHandle, BridgeError> {
        let Some(name) = self.symbols.get(&address) else {
            return Err(BridgeError::Creation { address, reason: "no symbol at address".into() });
        };
        let entry = FunctionEntry { name: name.clone(), calls: Vec::new(), library: None };
        self.functions.entry(address).or_insert(entry);
        Ok(FunctionHandle(address))
    }

    fn called_functions(&self, function: FunctionHandle) -> Result<Vec<FunctionHandle>, BridgeError> {
        let entry = self.entry(function)?;
        let mut callees: Vec<FunctionHandle> = Vec::new();
        for target in &entry.calls {
            if !self.functions.contains_key(target) {
                debug!("Ignoring call from {} to unknown address {target:#x}", entry.name);
                continue;
            }
            let handle = FunctionHandle(*target);
            if !callees.contains(&handle) {
                callees.push(handle);
            }
        }
        Ok(callees)
    }

    fn is_external(&self, function: FunctionHandle) -> bool {
        self.functions.get(&function.0).is_some_and(|f| f.library.is_some())
    }

    fn library_name(&self, function: FunctionHandle) -> Result<String, BridgeError> {
        self.entry(function)?.library.clone().ok_or(BridgeError::NotExternal(function.0))
    }

    fn entry_point(&self, function: FunctionHandle) -> Result<u64, BridgeError> {
        self.entry(function).map(|_| function.0)
    }

    fn name(&self, function: FunctionHandle) -> Result<String, BridgeError> {
        self.entry(function).map(|f| f.name.clone())
    }

    fn owning_module_path(&self, function: FunctionHandle) -> Result<String, BridgeError> {
        self.entry(function).map(|_| self.module.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_function_requires_a_symbol() {
        let mut db = InMemoryDatabase::new("m.dll").with_symbol(0x1000, "RpcOpen");
        assert!(db.function_at(0x1000).is_none());
        let handle = db.create_function(0x1000).unwrap();
        assert_eq!(db.name(handle).unwrap(), "RpcOpen");
        assert!(db.function_at(0x1000).is_some());
        assert!(matches!(db.create_function(0x2000), Err(BridgeError::Creation { .. })));
    }

    #[test]
    fn callees_are_listed_once_and_unknown_targets_dropped() {
        let db = InMemoryDatabase::new("m.dll")
            .with_function(0x1000, "A", &[0x2000, 0x2000, 0x9999])
            .with_function(0x2000, "B", &[]);
        let callees = db.called_functions(FunctionHandle(0x1000)).unwrap();
        assert_eq!(callees, vec![FunctionHandle(0x2000)]);
    }

    #[test]
    fn export_with_bad_hex_is_rejected() {
        let export = ProgramExport {
            module: "m.dll".into(),
            sections: vec![SectionExport { name: ".rdata".into(), start: 0, bytes: "zz".into() }],
            ..ProgramExport::default()
        };
        assert!(matches!(InMemoryDatabase::from_export(export), Err(BackendError::Parse(_))));
    }
}
