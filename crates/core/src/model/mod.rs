//! Output records: one `FunctionRecord` per RPC entry function and per call edge.
//!
//! Records are immutable once built. They are collected into a [`RecordLog`],
//! which only supports appending, and serialized as JSON Lines by
//! [`crate::output`].

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Placeholder name logged for dispatch entries whose function could not be resolved.
pub const UNRESOLVED_FUNCTION_NAME: &str = "__UNRESOLVED()";

/// Classification of an emitted function record.
///
/// The wire names are the ones existing consumers of the JSON Lines output key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FunctionType {
    #[serde(rename = "RPCFunction")]
    RpcFunction,
    #[serde(rename = "IntFunction")]
    InternalFunction,
    #[serde(rename = "ExtFunction")]
    ExternalFunction,
}

impl FunctionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionType::RpcFunction => "RPCFunction",
            FunctionType::InternalFunction => "IntFunction",
            FunctionType::ExternalFunction => "ExtFunction",
        }
    }
}

/// Replace Windows path separators so module paths compare equal across hosts.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Format an address the way records carry it: lowercase hex, no prefix.
pub fn format_address(address: u64) -> String {
    format!("{address:x}")
}

/// One emitted fact about an RPC entry function or a call edge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FunctionRecord {
    #[serde(rename = "Module")]
    module: String,
    #[serde(rename = "FunctionName")]
    function_name: String,
    #[serde(rename = "FunctionType")]
    function_type: FunctionType,
    #[serde(rename = "Address", deserialize_with = "deserialize_hex_address")]
    address: u64,
    #[serde(rename = "CalledByModule", default)]
    called_by_module: String,
    #[serde(rename = "CalledBy", default)]
    called_by: String,
}

impl FunctionRecord {
    /// Record for a function exposed through an RPC dispatch table.
    pub fn rpc_entry(module: &str, name: impl Into<String>, address: u64) -> Self {
        Self {
            module: normalize_path(module),
            function_name: name.into(),
            function_type: FunctionType::RpcFunction,
            address,
            called_by_module: String::new(),
            called_by: String::new(),
        }
    }

    /// Edge record for a callee defined inside the analyzed binary.
    pub fn internal_call(
        module: &str,
        name: impl Into<String>,
        address: u64,
        caller_module: &str,
        caller: impl Into<String>,
    ) -> Self {
        Self {
            module: normalize_path(module),
            function_name: name.into(),
            function_type: FunctionType::InternalFunction,
            address,
            called_by_module: normalize_path(caller_module),
            called_by: caller.into(),
        }
    }

    /// Edge record for an imported callee. Imports carry no local address.
    pub fn external_call(
        library: &str,
        name: impl Into<String>,
        caller_module: &str,
        caller: impl Into<String>,
    ) -> Self {
        Self {
            module: normalize_path(library),
            function_name: name.into(),
            function_type: FunctionType::ExternalFunction,
            address: 0,
            called_by_module: normalize_path(caller_module),
            called_by: caller.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn function_type(&self) -> FunctionType {
        self.function_type
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Address as written to the output (`"0"` for imports).
    pub fn address_hex(&self) -> String {
        format_address(self.address)
    }

    pub fn called_by_module(&self) -> &str {
        &self.called_by_module
    }

    pub fn called_by(&self) -> &str {
        &self.called_by
    }

    pub fn is_rpc_entry(&self) -> bool {
        self.function_type == FunctionType::RpcFunction
    }

    /// Serialize as a single JSON Lines entry (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// Entry records and edge records use different key orders on the wire.
#[derive(Serialize)]
struct RpcEntryLine<'a> {
    #[serde(rename = "Module")]
    module: &'a str,
    #[serde(rename = "FunctionType")]
    function_type: FunctionType,
    #[serde(rename = "FunctionName")]
    function_name: &'a str,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "CalledByModule")]
    called_by_module: &'a str,
    #[serde(rename = "CalledBy")]
    called_by: &'a str,
}

#[derive(Serialize)]
struct CallEdgeLine<'a> {
    #[serde(rename = "Module")]
    module: &'a str,
    #[serde(rename = "FunctionName")]
    function_name: &'a str,
    #[serde(rename = "FunctionType")]
    function_type: FunctionType,
    #[serde(rename = "CalledByModule")]
    called_by_module: &'a str,
    #[serde(rename = "CalledBy")]
    called_by: &'a str,
    #[serde(rename = "Address")]
    address: String,
}

impl Serialize for FunctionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.function_type {
            FunctionType::RpcFunction => RpcEntryLine {
                module: &self.module,
                function_type: self.function_type,
                function_name: &self.function_name,
                address: self.address_hex(),
                called_by_module: &self.called_by_module,
                called_by: &self.called_by,
            }
            .serialize(serializer),
            FunctionType::InternalFunction | FunctionType::ExternalFunction => CallEdgeLine {
                module: &self.module,
                function_name: &self.function_name,
                function_type: self.function_type,
                called_by_module: &self.called_by_module,
                called_by: &self.called_by,
                address: self.address_hex(),
            }
            .serialize(serializer),
        }
    }
}

fn deserialize_hex_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let digits = raw.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16)
        .map_err(|e| de::Error::custom(format!("invalid hex address {raw:?}: {e}")))
}

/// Append-only collection of records, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordLog {
    records: Vec<FunctionRecord>,
}

impl RecordLog {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn push(&mut self, record: FunctionRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FunctionRecord> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[FunctionRecord] {
        &self.records
    }

    /// Number of records of the given type.
    pub fn count_of(&self, function_type: FunctionType) -> usize {
        self.records.iter().filter(|r| r.function_type == function_type).count()
    }
}

impl<'a> IntoIterator for &'a RecordLog {
    type Item = &'a FunctionRecord;
    type IntoIter = std::slice::Iter<'a, FunctionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Extend<FunctionRecord> for RecordLog {
    fn extend<T: IntoIterator<Item = FunctionRecord>>(&mut self, iter: T) {
        self.records.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_entry_serializes_in_entry_key_order() {
        let record = FunctionRecord::rpc_entry("C:\\Windows\\System32\\svc.dll", "RpcOpen", 0x1_8001_1000);
        let line = record.to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"Module":"C:/Windows/System32/svc.dll","FunctionType":"RPCFunction","FunctionName":"RpcOpen","Address":"180011000","CalledByModule":"","CalledBy":""}"#
        );
    }

    #[test]
    fn edge_records_serialize_in_edge_key_order() {
        let record = FunctionRecord::external_call("KERNEL32.DLL", "CreateFileW", "/bin/svc.dll", "RpcOpen");
        let line = record.to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"Module":"KERNEL32.DLL","FunctionName":"CreateFileW","FunctionType":"ExtFunction","CalledByModule":"/bin/svc.dll","CalledBy":"RpcOpen","Address":"0"}"#
        );
    }

    #[test]
    fn records_parse_back_from_either_key_order() {
        let internal = FunctionRecord::internal_call("a\\b.dll", "Helper", 0x4010, "a\\b.dll", "RpcOpen");
        let parsed: FunctionRecord = serde_json::from_str(&internal.to_json_line().unwrap()).unwrap();
        assert_eq!(parsed, internal);
        assert_eq!(parsed.module(), "a/b.dll");
        assert_eq!(parsed.called_by_module(), "a/b.dll");
    }

    #[test]
    fn record_log_counts_by_type() {
        let mut log = RecordLog::new();
        log.push(FunctionRecord::rpc_entry("m", "f", 1));
        log.push(FunctionRecord::external_call("k32", "g", "m", "f"));
        log.push(FunctionRecord::external_call("k32", "h", "m", "f"));
        assert_eq!(log.len(), 3);
        assert_eq!(log.count_of(FunctionType::ExternalFunction), 2);
        assert_eq!(log.count_of(FunctionType::InternalFunction), 0);
    }
}
