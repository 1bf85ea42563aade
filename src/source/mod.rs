//! Row sources: where raw rows come from.
//!
//! The pipeline consumes rows as a stream so file size never dictates
//! memory use. [`RowSource`] is the seam for format-specific parsers; the
//! crate ships a CSV implementation and an in-memory one for tests and
//! embedded callers.

use std::path::{Path, PathBuf};

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};

use crate::error::{SourceError, SourceResult};
use crate::types::RowRecord;

/// A stream of parsed rows; item errors are per-row and recoverable.
pub type RowStream = BoxStream<'static, SourceResult<RowRecord>>;

/// A source of raw rows for an import run.
pub trait RowSource: Send + Sync {
    /// Open the source and stream its rows. Fails fast on unreadable input;
    /// row-level problems surface as stream items instead.
    fn rows(&self) -> SourceResult<RowStream>;
}

// =============================================================================
// CSV
// =============================================================================

/// Streams rows from a headered CSV file. Every cell is read as a string;
/// typing is the transformation layer's job.
pub struct CsvRowSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvRowSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl RowSource for CsvRowSource {
    fn rows(&self) -> SourceResult<RowStream> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(&self.path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(SourceError::NoHeaders);
        }

        let rows = reader
            .into_records()
            .enumerate()
            .map(move |(index, record)| {
                let row_number = index + 1;
                let record = record.map_err(|e| SourceError::InvalidRecord {
                    row: row_number,
                    message: e.to_string(),
                })?;
                let mut data = Map::new();
                for (column, cell) in headers.iter().zip(record.iter()) {
                    data.insert(column.clone(), Value::String(cell.to_string()));
                }
                Ok(RowRecord::new(row_number, data))
            });

        Ok(stream::iter(rows).boxed())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Serves pre-built rows; for tests and callers that already hold the data.
#[derive(Default)]
pub struct MemoryRowSource {
    rows: Vec<Map<String, Value>>,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<Map<String, Value>>) -> Self {
        Self { rows }
    }
}

impl RowSource for MemoryRowSource {
    fn rows(&self) -> SourceResult<RowStream> {
        let records: Vec<SourceResult<RowRecord>> = self
            .rows
            .iter()
            .enumerate()
            .map(|(index, data)| Ok(RowRecord::new(index + 1, data.clone())))
            .collect();
        Ok(stream::iter(records).boxed())
    }
}
