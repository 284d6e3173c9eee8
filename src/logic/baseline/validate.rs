use thiserror::Error;

use crate::error::ErrorCategory;

use super::record::BaselineRecord;
use super::storage::{BaselineSnapshot, SNAPSHOT_FORMAT_VERSION};

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("baseline IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("baseline serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("baseline snapshot format mismatch: expected v{expected}, got v{actual}")]
    SnapshotVersion { expected: u32, actual: u32 },

    #[error("invalid baseline record for {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("refresh window for {0} has no finite values")]
    EmptyWindow(String),

    #[error("unknown sort key '{0}' (expected one of: {1})")]
    UnknownSortKey(String, &'static str),

    #[error("unknown sort order '{0}' (expected asc or desc)")]
    UnknownSortOrder(String),

    #[error("invalid baseline configuration: {0}")]
    Configuration(String),
}

impl BaselineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BaselineError::Io(_) | BaselineError::Serialization(_) => ErrorCategory::Collaborator,
            BaselineError::SnapshotVersion { .. }
            | BaselineError::InvalidRecord { .. }
            | BaselineError::EmptyWindow(_) => ErrorCategory::DataQuality,
            BaselineError::UnknownSortKey(..)
            | BaselineError::UnknownSortOrder(_)
            | BaselineError::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

/// Validate snapshot compatibility with the current engine
pub fn validate_snapshot(snapshot: &BaselineSnapshot) -> Result<(), BaselineError> {
    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(BaselineError::SnapshotVersion {
            expected: SNAPSHOT_FORMAT_VERSION,
            actual: snapshot.format_version,
        });
    }

    for entry in &snapshot.records {
        validate_record(&entry.record).map_err(|reason| BaselineError::InvalidRecord {
            key: entry.key.to_string(),
            reason,
        })?;
    }
    Ok(())
}

/// Internal consistency of a single record
pub fn validate_record(record: &BaselineRecord) -> Result<(), String> {
    let summary = record.summary();
    if !summary.mean.is_finite() || !summary.std.is_finite() {
        return Err("non-finite statistics".to_string());
    }
    if record.m2() < 0.0 {
        return Err(format!("negative sum of squares {}", record.m2()));
    }
    if summary.count > 0 && record.min() > record.max() {
        return Err(format!("min {} above max {}", record.min(), record.max()));
    }
    if record.samples().len() > record.reservoir_capacity() {
        return Err(format!(
            "reservoir holds {} samples, capacity {}",
            record.samples().len(),
            record.reservoir_capacity()
        ));
    }
    if record.samples().iter().any(|v| !v.is_finite()) {
        return Err("non-finite reservoir sample".to_string());
    }
    Ok(())
}
