use std::path::Path;

use anyhow::Result;

use crate::commands::{effective_config, print_json, ConfigOverrides};

/// Print the configuration a scan would run with.
pub fn show_config_command(config: Option<&Path>, json: bool) -> Result<()> {
    let config = effective_config(config, &ConfigOverrides::default())?;
    if json {
        return print_json(&config);
    }

    println!("rpcmap configuration");
    println!("====================");
    println!("Data section: {}", config.data_section);
    println!("Code section: {}", config.code_section);
    println!("Max depth: {}", config.max_depth);
    println!("Dedupe callees: {}", config.dedupe_callees);
    println!("Max descriptor size: {:#x}", config.limits.max_struct_size);
    println!("Max dispatch count: {}", config.limits.max_dispatch_count);
    println!("Max function bytes: {:#x}", config.max_function_bytes);
    println!("Output: {}", config.output);
    Ok(())
}
