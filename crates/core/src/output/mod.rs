//! JSON Lines persistence for emitted records.
//!
//! The sink is always opened in append mode: running twice against the same
//! path keeps the first run's lines and adds the second run's after them.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::{FunctionRecord, RecordLog};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to open output {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write output {path} after {written} records: {source}")]
    Write {
        path: PathBuf,
        written: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Malformed record on line {line} of {path}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Append-mode JSON Lines writer.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it when missing.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open { path: path.clone(), source })?;
        Ok(Self { path, writer: BufWriter::new(file), written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written by this sink so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn append(&mut self, record: &FunctionRecord) -> Result<(), SinkError> {
        let line = record.to_json_line()?;
        writeln!(self.writer, "{line}").map_err(|source| self.write_error(source))?;
        self.written += 1;
        Ok(())
    }

    pub fn append_all(&mut self, records: &RecordLog) -> Result<usize, SinkError> {
        for record in records {
            self.append(record)?;
        }
        Ok(self.written)
    }

    /// Push buffered lines to the file so they survive the process dying.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(|source| self.write_error(source))
    }

    /// Flush buffered lines and return the number of records written.
    pub fn finish(mut self) -> Result<usize, SinkError> {
        self.flush()?;
        Ok(self.written)
    }

    fn write_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Write { path: self.path.clone(), written: self.written, source }
    }
}

/// Append every record in `records` to `path`, returning how many were written.
pub fn append_records(path: impl AsRef<Path>, records: &RecordLog) -> Result<usize, SinkError> {
    let mut sink = JsonLinesSink::open_append(path)?;
    sink.append_all(records)?;
    sink.finish()
}

/// Read a JSON Lines file back into records. Blank lines are ignored.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<FunctionRecord>, SinkError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| SinkError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
