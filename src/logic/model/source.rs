//! Model Source - Supplies trained adapter pairs to the detector
//!
//! A source hands out both adapters plus a version id at startup and on
//! hot-reload. The file source reads JSON artifacts from a directory and uses
//! the SHA-256 of their bytes as the version.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::adapter::{ModelAdapter, ModelError};
use super::isolation::IsolationForestAdapter;
use super::reconstruction::MeanReconstructor;

/// Artifact file of the isolation adapter
pub const ISOLATION_ARTIFACT: &str = "isolation_forest.json";

/// Artifact file of the reconstruction adapter
pub const RECONSTRUCTION_ARTIFACT: &str = "reconstruction.json";

// ============================================================================
// MODEL PAIR
// ============================================================================

/// Both ensemble members and the version they were published under
#[derive(Clone)]
pub struct ModelPair {
    pub isolation: Arc<dyn ModelAdapter>,
    pub reconstruction: Arc<dyn ModelAdapter>,
    pub version: String,
}

impl ModelPair {
    pub fn new(
        isolation: Arc<dyn ModelAdapter>,
        reconstruction: Arc<dyn ModelAdapter>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            isolation,
            reconstruction,
            version: version.into(),
        }
    }
}

impl std::fmt::Debug for ModelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPair")
            .field("isolation", &self.isolation.kind())
            .field("reconstruction", &self.reconstruction.kind())
            .field("version", &self.version)
            .finish()
    }
}

// ============================================================================
// SOURCE TRAIT
// ============================================================================

pub trait ModelSource: Send + Sync {
    /// Load (or reload) the current pair
    fn load(&self) -> Result<ModelPair, ModelError>;

    fn is_loaded(&self) -> bool;

    fn get_model_info(&self) -> serde_json::Value;
}

/// Source wrapping an already-built pair
pub struct StaticModelSource {
    pair: ModelPair,
}

impl StaticModelSource {
    pub fn new(pair: ModelPair) -> Self {
        Self { pair }
    }
}

impl ModelSource for StaticModelSource {
    fn load(&self) -> Result<ModelPair, ModelError> {
        Ok(self.pair.clone())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn get_model_info(&self) -> serde_json::Value {
        serde_json::json!({
            "source": "static",
            "version": self.pair.version,
            "isolation": self.pair.isolation.model_info(),
            "reconstruction": self.pair.reconstruction.model_info(),
        })
    }
}

// ============================================================================
// FILE SOURCE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct LoadedArtifacts {
    version: String,
    loaded_at: DateTime<Utc>,
}

/// Reads reference adapter artifacts from a directory
pub struct FileModelSource {
    dir: PathBuf,
    loaded: RwLock<Option<LoadedArtifacts>>,
}

impl FileModelSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write both artifacts and return the version they will load under
    pub fn save(
        dir: &Path,
        isolation: &IsolationForestAdapter,
        reconstruction: &MeanReconstructor,
    ) -> Result<String, ModelError> {
        fs::create_dir_all(dir)?;

        let isolation_bytes = serde_json::to_vec(isolation)?;
        let reconstruction_bytes = serde_json::to_vec(reconstruction)?;
        fs::write(dir.join(ISOLATION_ARTIFACT), &isolation_bytes)?;
        fs::write(dir.join(RECONSTRUCTION_ARTIFACT), &reconstruction_bytes)?;

        let version = artifact_version(&isolation_bytes, &reconstruction_bytes);
        log::info!("Saved model artifacts to {} (version {})", dir.display(), version);
        Ok(version)
    }

    fn read_artifact(&self, name: &str) -> Result<Vec<u8>, ModelError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(ModelError::Artifact(format!("missing {}", path.display())));
        }
        Ok(fs::read(path)?)
    }
}

impl ModelSource for FileModelSource {
    fn load(&self) -> Result<ModelPair, ModelError> {
        let isolation_bytes = self.read_artifact(ISOLATION_ARTIFACT)?;
        let reconstruction_bytes = self.read_artifact(RECONSTRUCTION_ARTIFACT)?;

        let isolation: IsolationForestAdapter = serde_json::from_slice(&isolation_bytes)?;
        let reconstruction: MeanReconstructor = serde_json::from_slice(&reconstruction_bytes)?;
        let version = artifact_version(&isolation_bytes, &reconstruction_bytes);

        log::info!("Loaded model artifacts from {} (version {})", self.dir.display(), version);
        *self.loaded.write() = Some(LoadedArtifacts {
            version: version.clone(),
            loaded_at: Utc::now(),
        });

        Ok(ModelPair::new(Arc::new(isolation), Arc::new(reconstruction), version))
    }

    fn is_loaded(&self) -> bool {
        self.loaded.read().is_some()
    }

    fn get_model_info(&self) -> serde_json::Value {
        serde_json::json!({
            "source": "file",
            "dir": self.dir.display().to_string(),
            "loaded": self.loaded.read().clone(),
        })
    }
}

/// First 16 hex chars of SHA-256 over both artifacts
fn artifact_version(isolation: &[u8], reconstruction: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(isolation);
    hasher.update(reconstruction);
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
