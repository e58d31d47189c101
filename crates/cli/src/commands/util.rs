use std::path::Path;

use anyhow::{Context, Result};
use rpcmap_core::config::MapperConfig;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output: Option<String>,
    pub max_depth: Option<u32>,
    pub data_section: Option<String>,
    pub code_section: Option<String>,
    pub dedupe: bool,
}

/// Load the config file (or defaults) and apply CLI overrides on top.
pub fn effective_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<MapperConfig> {
    let mut config = MapperConfig::load_or_default(path).with_context(|| match path {
        Some(p) => format!("Failed to load config {}", p.display()),
        None => "Failed to build default config".to_string(),
    })?;
    if let Some(output) = &overrides.output {
        config.output = output.clone();
    }
    if let Some(depth) = overrides.max_depth {
        config.max_depth = depth;
    }
    if let Some(name) = &overrides.data_section {
        config.data_section = name.clone();
    }
    if let Some(name) = &overrides.code_section {
        config.code_section = name.clone();
    }
    if overrides.dedupe {
        config.dedupe_callees = true;
    }
    config.validate().context("Invalid configuration after applying command-line overrides")?;
    Ok(config)
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    println!("{serialized}");
    Ok(())
}
