//! CSV persistence for candles and derived tables.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use updown_common::Candle;

/// Append-mode CSV writer. The file is opened lazily; headers are only
/// written when the file is new or empty, so repeated runs keep
/// appending to one well-formed table.
pub struct CsvAppender {
    path: PathBuf,
    writer: Mutex<Option<csv::Writer<std::fs::File>>>,
    rows_written: AtomicU64,
}

impl CsvAppender {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(None),
            rows_written: AtomicU64::new(0),
        }
    }

    pub fn append<T: Serialize>(&self, row: &T) -> Result<()> {
        let mut guard = self.writer.lock().unwrap();
        let writer = match guard.as_mut() {
            Some(writer) => writer,
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory {}", parent.display())
                    })?;
                }
                let needs_headers = std::fs::metadata(&self.path)
                    .map(|m| m.len() == 0)
                    .unwrap_or(true);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .with_context(|| format!("Failed to open {}", self.path.display()))?;
                info!("Appending to {}", self.path.display());
                guard.insert(
                    csv::WriterBuilder::new()
                        .has_headers(needs_headers)
                        .from_writer(file),
                )
            }
        };

        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        writer.flush()?;

        self.rows_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes `rows` to a fresh CSV file, replacing any existing content.
/// Returns the number of rows written.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Loads candles from CSV, skipping rows that fail to parse.
pub fn read_candles_csv(path: &Path) -> Result<Vec<Candle>> {
    read_csv(path)
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for (row_no, result) in reader.deserialize().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping row {} in {}: {}", row_no + 1, path.display(), e),
        }
    }
    Ok(rows)
}
