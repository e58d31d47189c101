use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rpcmap::commands::{
    scan_command, show_config_command, summarize_command, ConfigOverrides, ScanArgs,
};
use rpcmap::init_logging;

/// Windows RPC server interface mapper.
///
/// This CLI is a thin wrapper around `rpcmap-core` (exposed in code as `rpcmap_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "rpcmap",
    version,
    about = "Map Windows RPC server interfaces to the call graphs behind them",
    long_about = None
)]
struct Cli {
    /// Log filter (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan binaries for RPC interfaces and append the mapped records to the output.
    ///
    /// Records are appended: running twice against the same output keeps both runs.
    Scan {
        /// PE image to analyse. Repeat for several binaries.
        #[arg(long = "binary", value_name = "PATH")]
        binaries: Vec<PathBuf>,

        /// JSON program export to analyse instead of a binary. Repeatable.
        #[arg(long = "export", value_name = "PATH")]
        exports: Vec<PathBuf>,

        /// Output JSON Lines file. Defaults to the configured output (AllRpcFuncMaps.json).
        #[arg(long)]
        output: Option<String>,

        /// Config file (.json, .yaml or .yml).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of call hops followed from each RPC function.
        #[arg(long)]
        max_depth: Option<u32>,

        /// Section scanned for interface descriptors.
        #[arg(long)]
        data_section: Option<String>,

        /// Section dispatch routines must point into.
        #[arg(long)]
        code_section: Option<String>,

        /// Emit each function at most once per RPC entry.
        #[arg(long, default_value_t = false)]
        dedupe: bool,

        /// Emit the run summary as JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Hide the progress bar.
        #[arg(long, default_value_t = false)]
        no_progress: bool,
    },

    /// Print the effective configuration.
    ShowConfig {
        /// Config file (.json, .yaml or .yml).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Summarize an output file by function type and module.
    Summarize {
        /// JSON Lines file written by `scan`.
        #[arg(long)]
        input: PathBuf,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Scan {
            binaries,
            exports,
            output,
            config,
            max_depth,
            data_section,
            code_section,
            dedupe,
            json,
            no_progress,
        } => {
            let args = ScanArgs {
                binaries,
                exports,
                config,
                overrides: ConfigOverrides { output, max_depth, data_section, code_section, dedupe },
                json,
                progress: !no_progress,
            };
            scan_command(&args)?
        }
        Command::ShowConfig { config, json } => show_config_command(config.as_deref(), json)?,
        Command::Summarize { input, json } => summarize_command(&input, json)?,
    }

    Ok(())
}
