//! Append-only NDJSON persistence.
//!
//! One serialized record per line. Files are opened lazily on first
//! append and records are written with a single write call so lines
//! stay whole even with multiple writers on the same handle.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

pub struct NdjsonWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
    records_written: AtomicU64,
}

impl NdjsonWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
            records_written: AtomicU64::new(0),
        }
    }

    /// Appends one record as a JSON line, creating the file and parent
    /// directories on first use.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize record")?;

        let mut guard = self.file.lock().unwrap();
        let file = match guard.as_mut() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory {}", parent.display())
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .with_context(|| format!("Failed to open {}", self.path.display()))?;
                info!("Appending to {}", self.path.display());
                guard.insert(file)
            }
        };

        file.write_all(format!("{}\n", line).as_bytes())
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        file.flush()?;

        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every parseable record from an NDJSON file. Malformed lines
/// are logged and skipped so one bad write never poisons a whole file.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping malformed line {} in {}: {}", line_no + 1, path.display(), e);
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        name: String,
        value: i64,
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("updown-ndjson-{}-{}.ndjson", tag, std::process::id()))
    }

    #[test]
    fn test_append_and_read_round_trip() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let writer = NdjsonWriter::new(path.clone());
        writer
            .append(&Row {
                name: "a".to_string(),
                value: 1,
            })
            .unwrap();
        writer
            .append(&Row {
                name: "b".to_string(),
                value: 2,
            })
            .unwrap();
        assert_eq!(writer.records_written(), 2);

        let rows: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "b");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let path = temp_path("malformed");
        std::fs::write(
            &path,
            "{\"name\":\"ok\",\"value\":1}\nnot json\n\n{\"name\":\"also ok\",\"value\":2}\n",
        )
        .unwrap();

        let rows: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, 1);
        assert_eq!(rows[1].value, 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_creates_parent_directories() {
        let dir = std::env::temp_dir().join(format!("updown-ndjson-dir-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("out.ndjson");

        let writer = NdjsonWriter::new(path.clone());
        writer
            .append(&Row {
                name: "x".to_string(),
                value: 9,
            })
            .unwrap();
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
