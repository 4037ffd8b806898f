//! Append-only descriptor store with linear nearest-neighbour lookup.
//!
//! Records live in memory as an immutable `Arc<Vec<_>>` snapshot. Appends
//! build a new vector and swap it in, so a scan that already holds a snapshot
//! never sees a partially updated store. When backed by a file, every append
//! is also written as one line:
//!
//! ```text
//! 1,Alice,"[0.0123, -0.0456, ...]"
//! ```

use crate::lines::{append_line, quote_field, read_lines, split_fields};
use crate::types::{Descriptor, EnrollmentRecord, Identity, MatchResult, DESCRIPTOR_LEN};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Maximum Euclidean distance (inclusive) for a positive match.
pub const MATCH_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("identifier {0} already enrolled")]
    DuplicateIdentifier(u32),
    #[error("invalid name: {0}")]
    InvalidName(String),
}

pub struct DescriptorStore {
    path: Option<PathBuf>,
    threshold: f64,
    records: RwLock<Arc<Vec<EnrollmentRecord>>>,
}

impl DescriptorStore {
    /// An empty store that is never persisted.
    pub fn in_memory(threshold: f64) -> Self {
        Self {
            path: None,
            threshold,
            records: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Open a file-backed store, loading any existing records.
    ///
    /// Malformed lines are skipped with a warning; the rest load normally.
    pub fn open(path: impl Into<PathBuf>, threshold: f64) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            load_records(&path)?
        } else {
            Vec::new()
        };

        tracing::info!(path = %path.display(), records = records.len(), "descriptor store opened");

        Ok(Self {
            path: Some(path),
            threshold,
            records: RwLock::new(Arc::new(records)),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Consistent view of every record as of this call.
    pub fn snapshot(&self) -> Arc<Vec<EnrollmentRecord>> {
        Arc::clone(&self.records.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.snapshot()
            .iter()
            .map(|r| Identity {
                identifier: r.identifier,
                name: r.name.clone(),
            })
            .collect()
    }

    /// Smallest positive identifier not already in use.
    pub fn next_identifier(&self) -> u32 {
        next_identifier(self.snapshot().iter().map(|r| r.identifier))
    }

    /// Append a record with a caller-chosen identifier.
    pub fn append(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
        validate_name(&record.name)?;
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|r| r.identifier == record.identifier) {
            return Err(StoreError::DuplicateIdentifier(record.identifier));
        }
        self.commit(&mut guard, record)
    }

    /// Assign the next free identifier and append, atomically.
    pub fn enroll(&self, name: &str, descriptor: Descriptor) -> Result<EnrollmentRecord, StoreError> {
        validate_name(name)?;
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = EnrollmentRecord {
            identifier: next_identifier(guard.iter().map(|r| r.identifier)),
            name: name.to_string(),
            descriptor,
        };
        self.commit(&mut guard, record.clone())?;
        tracing::info!(identifier = record.identifier, name = %record.name, "identity enrolled");
        Ok(record)
    }

    /// Nearest stored record to `query`. Ties resolve to the earliest record.
    ///
    /// Returns `None` only when the store is empty.
    pub fn nearest_match(&self, query: &Descriptor) -> Option<MatchResult> {
        let snapshot = self.snapshot();
        let mut best: Option<(&EnrollmentRecord, f64)> = None;

        for record in snapshot.iter() {
            let distance = record.descriptor.distance(query);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((record, distance));
            }
        }

        best.map(|(record, distance)| MatchResult {
            matched: distance <= self.threshold,
            identifier: record.identifier,
            name: record.name.clone(),
            distance,
        })
    }

    fn commit(
        &self,
        guard: &mut Arc<Vec<EnrollmentRecord>>,
        record: EnrollmentRecord,
    ) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            append_line(path, &format_record(&record))?;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(record);
        *guard = Arc::new(next);
        Ok(())
    }
}

/// Smallest positive integer absent from `identifiers`.
pub fn next_identifier(identifiers: impl IntoIterator<Item = u32>) -> u32 {
    let sorted: BTreeSet<u32> = identifiers.into_iter().collect();
    let mut candidate = 1;
    for id in sorted {
        if id > candidate {
            break;
        }
        if id == candidate {
            candidate += 1;
        }
    }
    candidate
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidName("name is empty".into()));
    }
    if name.contains(['\n', '\r']) {
        return Err(StoreError::InvalidName("name contains a line break".into()));
    }
    Ok(())
}

fn load_records(path: &Path) -> Result<Vec<EnrollmentRecord>, StoreError> {
    let mut records: Vec<EnrollmentRecord> = Vec::new();

    for (number, line) in read_lines(path)? {
        match line.map_err(StoreError::Malformed).and_then(|l| parse_record(&l)) {
            Ok(record) if records.iter().any(|r| r.identifier == record.identifier) => {
                tracing::warn!(
                    path = %path.display(),
                    line = number,
                    identifier = record.identifier,
                    "skipping duplicate identifier in descriptor store"
                );
            }
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = number,
                    error = %e,
                    "skipping malformed descriptor record"
                );
            }
        }
    }

    Ok(records)
}

/// Render a record as one store line.
pub fn format_record(record: &EnrollmentRecord) -> String {
    let values: Vec<String> = record
        .descriptor
        .values()
        .iter()
        .map(|v| v.to_string())
        .collect();
    format!(
        "{},{},\"[{}]\"",
        record.identifier,
        quote_field(&record.name),
        values.join(", ")
    )
}

/// Parse one store line.
pub fn parse_record(line: &str) -> Result<EnrollmentRecord, StoreError> {
    let fields = split_fields(line).map_err(StoreError::Malformed)?;
    let [id, name, descriptor] = <[String; 3]>::try_from(fields)
        .map_err(|f| StoreError::Malformed(format!("expected 3 fields, got {}", f.len())))?;

    let identifier: u32 = id
        .trim()
        .parse()
        .map_err(|e| StoreError::Malformed(format!("identifier {id:?}: {e}")))?;
    if identifier == 0 {
        return Err(StoreError::Malformed("identifier must be positive".into()));
    }

    Ok(EnrollmentRecord {
        identifier,
        name,
        descriptor: parse_descriptor(&descriptor)?,
    })
}

/// Parse a bracketed list of exactly [`DESCRIPTOR_LEN`] floats.
fn parse_descriptor(text: &str) -> Result<Descriptor, StoreError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| StoreError::Malformed("descriptor must be a bracketed list".into()))?;

    let mut values = Vec::with_capacity(DESCRIPTOR_LEN);
    for (index, item) in inner.split(',').enumerate() {
        if index >= DESCRIPTOR_LEN {
            return Err(StoreError::Malformed(format!(
                "descriptor has more than {DESCRIPTOR_LEN} values"
            )));
        }
        let value: f32 = item
            .trim()
            .parse()
            .map_err(|e| StoreError::Malformed(format!("descriptor value {index}: {e}")))?;
        values.push(value);
    }

    Descriptor::new(values).map_err(|e| StoreError::Malformed(e.to_string()))
}
