//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! `CoreConfig::from_env` falls back to these when a variable is unset.

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "TRIDENT";

// ============================================
// Ensemble
// ============================================

/// Isolation-model weight in the fused score
pub const DEFAULT_IF_WEIGHT: f64 = 0.5;

/// Reconstruction-model weight in the fused score
pub const DEFAULT_AE_WEIGHT: f64 = 0.5;

/// Operating threshold of a freshly constructed detector
pub const DEFAULT_DETECTOR_THRESHOLD: f64 = 0.5;

/// Operating threshold used by the scoring service
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.7;

/// Tolerance when checking that the ensemble weights sum to 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Fraction of the remaining gap closed when both models agree
pub const AGREEMENT_CONFIDENCE_BOOST: f64 = 0.5;

// ============================================
// Feature engineering
// ============================================

/// Feature cache lifetime (seconds)
pub const DEFAULT_FEATURE_CACHE_TTL: u64 = 3600;

/// Maximum number of cached aggregates
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Trailing window for rate features (seconds)
pub const DEFAULT_RATE_WINDOW_SECONDS: i64 = 60;

/// Per-record extraction budget (milliseconds)
pub const EXTRACTION_BUDGET_MS: u128 = 100;

/// Records per scoring batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================
// Baseline / drift
// ============================================

/// Scheduled baseline + threshold recomputation interval (seconds)
pub const DEFAULT_BASELINE_UPDATE_INTERVAL: u64 = 3600;

/// Recent samples kept per baseline for percentiles
pub const DEFAULT_RESERVOIR_SIZE: usize = 512;

/// Minimum samples in either window before drift can be declared
pub const DEFAULT_DRIFT_MIN_SAMPLES: usize = 30;

/// Mean shift (in baseline standard deviations) that counts as drift
pub const DEFAULT_DRIFT_SENSITIVITY: f64 = 3.0;

/// Significance level for the Kolmogorov-Smirnov drift test
pub const DEFAULT_KS_ALPHA: f64 = 0.05;

/// Score below which an observation may be learned into a baseline
pub const DEFAULT_LEARNING_GATE: f64 = 0.5;

/// Percentile of normal scores used as the adaptive threshold
pub const DEFAULT_THRESHOLD_PERCENTILE: f64 = 0.95;

/// Adaptive threshold floor
pub const DEFAULT_THRESHOLD_MIN: f64 = 0.3;

/// Adaptive threshold ceiling
pub const DEFAULT_THRESHOLD_MAX: f64 = 0.95;

/// Learning-gate shift applied per feedback label
pub const FEEDBACK_GATE_STEP: f64 = 0.05;

/// Maximum learning-gate shift from feedback in either direction
pub const FEEDBACK_GATE_MAX_SHIFT: f64 = 0.3;

/// Log filter used when `TRIDENT_LOG_LEVEL` is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Platform data dir for model artifacts
pub fn default_model_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("trident")
        .join("models")
}
