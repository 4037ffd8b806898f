//! Append-only attendance log: `identifier,name,timestamp` per line.

use crate::lines::{append_line, quote_field, read_lines, split_fields};
use crate::types::AttendanceRecord;
use chrono::{DateTime, Local, SecondsFormat};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed attendance line: {0}")]
    Malformed(String),
}

pub struct AttendanceLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log a check-in at the current local time.
    pub fn append(&self, identifier: u32, name: &str) -> Result<AttendanceRecord, AttendanceError> {
        self.append_at(identifier, name, Local::now())
    }

    pub fn append_at(
        &self,
        identifier: u32,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let record = AttendanceRecord {
            identifier,
            name: name.to_string(),
            timestamp,
        };
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        append_line(&self.path, &format_entry(&record))?;
        tracing::info!(identifier, name, "attendance logged");
        Ok(record)
    }

    /// Read every well-formed entry; malformed lines are skipped with a warning.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for (number, line) in read_lines(&self.path)? {
            match line.map_err(AttendanceError::Malformed).and_then(|l| parse_entry(&l)) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(line = number, error = %e, "skipping attendance line"),
            }
        }
        Ok(records)
    }
}

fn format_entry(record: &AttendanceRecord) -> String {
    format!(
        "{},{},{}",
        record.identifier,
        quote_field(&record.name),
        record.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    )
}

fn parse_entry(line: &str) -> Result<AttendanceRecord, AttendanceError> {
    let fields = split_fields(line).map_err(AttendanceError::Malformed)?;
    let [id, name, timestamp] = <[String; 3]>::try_from(fields)
        .map_err(|f| AttendanceError::Malformed(format!("expected 3 fields, got {}", f.len())))?;
    let identifier = id
        .trim()
        .parse()
        .map_err(|e| AttendanceError::Malformed(format!("identifier {id:?}: {e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp.trim())
        .map_err(|e| AttendanceError::Malformed(format!("timestamp: {e}")))?
        .with_timezone(&Local);
    Ok(AttendanceRecord {
        identifier,
        name,
        timestamp,
    })
}
