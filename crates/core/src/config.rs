//! Mapper configuration, loadable from JSON or YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{WalkOptions, MAX_DEPTH};
use crate::scan::ScanLimits;

/// Default output file; records are appended to it across runs.
pub const DEFAULT_OUTPUT: &str = "AllRpcFuncMaps.json";
/// Longest function body disassembled when no unwind range is known.
pub const DEFAULT_MAX_FUNCTION_BYTES: usize = 0x4000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unsupported config format: {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one mapping run.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Section scanned for interface descriptors.
    pub data_section: String,
    /// Section routine pointers must land in.
    pub code_section: String,
    /// Number of call hops followed from each RPC entry.
    pub max_depth: u32,
    /// Suppress repeated functions within one RPC entry's walk.
    pub dedupe_callees: bool,
    pub limits: ScanLimits,
    /// JSON Lines sink path.
    pub output: String,
    /// Cap on bytes disassembled per function by the PE backend.
    pub max_function_bytes: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            data_section: ".rdata".to_string(),
            code_section: ".text".to_string(),
            max_depth: MAX_DEPTH,
            dedupe_callees: false,
            limits: ScanLimits::default(),
            output: DEFAULT_OUTPUT.to_string(),
            max_function_bytes: DEFAULT_MAX_FUNCTION_BYTES,
        }
    }
}

impl MapperConfig {
    /// Load a config file; the format follows the extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
        let config: MapperConfig = match ext.as_str() {
            "json" => serde_json::from_str(&body)?,
            "yaml" | "yml" => serde_yaml::from_str(&body)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_section.trim().is_empty() {
            return Err(ConfigError::Invalid("'data_section' must not be empty".into()));
        }
        if self.code_section.trim().is_empty() {
            return Err(ConfigError::Invalid("'code_section' must not be empty".into()));
        }
        if self.output.trim().is_empty() {
            return Err(ConfigError::Invalid("'output' must not be empty".into()));
        }
        if self.limits.max_struct_size == 0 {
            return Err(ConfigError::Invalid("'limits.max_struct_size' must be positive".into()));
        }
        Ok(())
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions { max_depth: self.max_depth, dedupe: self.dedupe_callees }
    }
}
