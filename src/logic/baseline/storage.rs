use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::features::EntityKey;

use super::feedback::FeedbackStats;
use super::record::BaselineRecord;
use super::threshold::AdaptiveThreshold;
use super::types::BaselineKey;
use super::validate::{validate_snapshot, BaselineError};

/// Bumped whenever the snapshot layout changes
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub key: BaselineKey,
    pub record: BaselineRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEntry {
    pub entity: EntityKey,
    pub gate: f64,
}

/// Everything `BaselineStats` needs to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<RecordEntry>,
    #[serde(default)]
    pub gates: Vec<GateEntry>,
    #[serde(default)]
    pub thresholds: Vec<AdaptiveThreshold>,
    #[serde(default)]
    pub feedback: FeedbackStats,
}

/// Get default snapshot path
pub fn get_default_snapshot_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trident")
        .join("baseline_v1.json")
}

/// Save snapshot to disk
pub fn save_snapshot(snapshot: &BaselineSnapshot, path: &Path) -> Result<(), BaselineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Write-then-rename; readers only ever see a complete file
    let staging = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(snapshot)?;
    fs::write(&staging, json)?;
    fs::rename(&staging, path)?;
    Ok(())
}

/// Load snapshot from disk with validation
pub fn load_snapshot(path: &Path) -> Result<BaselineSnapshot, BaselineError> {
    let data = fs::read(path)?;
    let snapshot: BaselineSnapshot = serde_json::from_slice(&data)?;
    validate_snapshot(&snapshot)?;
    Ok(snapshot)
}
