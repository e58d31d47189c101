//! rpcmap-core
//!
//! Core library for mapping Windows RPC server interfaces to the code behind them.
//!
//! This crate defines the record model, the descriptor scanner for read-only
//! data sections, the bounded call-graph walker, and the analysis database
//! adapters (PE images via goblin + capstone, or JSON program exports).
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends.

pub mod model;
pub mod scan;
pub mod analysis;
pub mod config;
pub mod output;
pub mod services;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
