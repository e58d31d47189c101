use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::analysis::AnalysisDatabase;
use crate::config::MapperConfig;

pub mod memory;
#[cfg(feature = "pe-backend")]
pub mod pe;

pub use memory::{FunctionExport, InMemoryDatabase, ProgramExport, SectionExport, SymbolExport};
#[cfg(feature = "pe-backend")]
pub use pe::PeDatabase;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Binary not found at {0}")]
    MissingBinary(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported binary format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to parse input: {0}")]
    Parse(String),
    #[error("Disassembler error: {0}")]
    Disassembler(String),
}

/// Where the program data for one mapping run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSource {
    /// PE image on disk, analysed with the built-in disassembler.
    Binary(PathBuf),
    /// JSON program export produced by another tool.
    Export(PathBuf),
}

impl DatabaseSource {
    pub fn path(&self) -> &Path {
        match self {
            DatabaseSource::Binary(p) | DatabaseSource::Export(p) => p,
        }
    }
}

/// Open the analysis database for `source`.
pub fn open_database(
    source: &DatabaseSource,
    config: &MapperConfig,
) -> Result<Box<dyn AnalysisDatabase>, BackendError> {
    match source {
        DatabaseSource::Export(path) => Ok(Box::new(InMemoryDatabase::load(path)?)),
        #[cfg(feature = "pe-backend")]
        DatabaseSource::Binary(path) => {
            Ok(Box::new(PeDatabase::open(path, &config.code_section, config.max_function_bytes)?))
        }
        #[cfg(not(feature = "pe-backend"))]
        DatabaseSource::Binary(path) => {
            let _ = config;
            Err(BackendError::UnsupportedFormat(format!(
                "{} (built without the pe-backend feature)",
                path.display()
            )))
        }
    }
}
