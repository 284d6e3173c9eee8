//! Configuration module
//!
//! `CoreConfig::from_env` reads `TRIDENT_*` variables (after loading a `.env`
//! file if one exists) on top of the defaults in `constants.rs`. A variable
//! that is set but does not parse is an error, not a silent default.
//!
//! | Variable | Default |
//! |---|---|
//! | `TRIDENT_IF_WEIGHT` / `TRIDENT_AE_WEIGHT` | 0.5 / 0.5 |
//! | `TRIDENT_ANOMALY_THRESHOLD` | 0.7 |
//! | `TRIDENT_FEATURE_CACHE_TTL` | 3600 s |
//! | `TRIDENT_CACHE_CAPACITY` | 10000 |
//! | `TRIDENT_RATE_WINDOW` | 60 s |
//! | `TRIDENT_BATCH_SIZE` | 100 |
//! | `TRIDENT_BASELINE_UPDATE_INTERVAL` | 3600 s |
//! | `TRIDENT_LEARNING_GATE` | 0.5 |
//! | `TRIDENT_DRIFT_TEST` (`mean_shift` / `ks`) | mean_shift |
//! | `TRIDENT_DRIFT_SENSITIVITY` / `TRIDENT_KS_ALPHA` | 3.0 / 0.05 |
//! | `TRIDENT_ADAPTIVE_THRESHOLD` | true |
//! | `TRIDENT_MODEL_PATH` | `<data dir>/trident/models` |
//! | `TRIDENT_BASELINE_PATH` | `<data dir>/trident/baseline_v1.json` |
//! | `TRIDENT_LOG_LEVEL` | info |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    default_model_dir, DEFAULT_ANOMALY_THRESHOLD, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_CAPACITY, DEFAULT_FEATURE_CACHE_TTL,
    DEFAULT_KS_ALPHA, DEFAULT_RATE_WINDOW_SECONDS, DEFAULT_DRIFT_SENSITIVITY, DEFAULT_IF_WEIGHT, DEFAULT_AE_WEIGHT,
    DEFAULT_LOG_LEVEL,
};
use crate::logic::baseline::storage::get_default_snapshot_path;
use crate::logic::baseline::{BaselineConfig, BaselineError, DriftTestKind};
use crate::logic::detector::{DetectorError, DetectorSettings};
use crate::logic::features::ExtractorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub if_weight: f64,
    pub ae_weight: f64,
    /// Static operating threshold (also the adaptive fallback)
    pub anomaly_threshold: f64,

    pub feature_cache_ttl: Duration,
    pub cache_capacity: usize,
    pub rate_window_seconds: i64,
    pub batch_size: usize,

    pub baseline: BaselineConfig,
    /// Push recomputed global thresholds into the detector
    pub adaptive_threshold: bool,

    pub model_dir: PathBuf,
    pub baseline_path: PathBuf,
    pub log_level: String,
}

impl CoreConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source, then validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.if_weight = parse_or(&lookup, "TRIDENT_IF_WEIGHT", config.if_weight)?;
        config.ae_weight = parse_or(&lookup, "TRIDENT_AE_WEIGHT", config.ae_weight)?;
        config.anomaly_threshold = parse_or(&lookup, "TRIDENT_ANOMALY_THRESHOLD", config.anomaly_threshold)?;

        config.feature_cache_ttl = Duration::from_secs(parse_or(
            &lookup,
            "TRIDENT_FEATURE_CACHE_TTL",
            config.feature_cache_ttl.as_secs(),
        )?);
        config.cache_capacity = parse_or(&lookup, "TRIDENT_CACHE_CAPACITY", config.cache_capacity)?;
        config.rate_window_seconds = parse_or(&lookup, "TRIDENT_RATE_WINDOW", config.rate_window_seconds)?;
        config.batch_size = parse_or(&lookup, "TRIDENT_BATCH_SIZE", config.batch_size)?;

        let interval = parse_or(
            &lookup,
            "TRIDENT_BASELINE_UPDATE_INTERVAL",
            config.baseline.update_interval_seconds,
        )?;
        config.baseline.update_interval_seconds = interval;
        config.baseline.window_seconds = interval;
        config.baseline.learning_gate = parse_or(&lookup, "TRIDENT_LEARNING_GATE", config.baseline.learning_gate)?;
        config.baseline.drift_test = drift_test(&lookup)?;
        config.baseline.threshold.fallback = config.anomaly_threshold;
        config.adaptive_threshold = parse_or(&lookup, "TRIDENT_ADAPTIVE_THRESHOLD", config.adaptive_threshold)?;

        if let Some(dir) = lookup("TRIDENT_MODEL_PATH") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("TRIDENT_BASELINE_PATH") {
            config.baseline_path = PathBuf::from(path);
        }
        if let Some(level) = lookup("TRIDENT_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on anything the detector or baseline engine would reject
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector_settings()?;
        self.baseline.validate()?;

        if self.cache_capacity == 0 {
            return Err(invalid("TRIDENT_CACHE_CAPACITY", &self.cache_capacity, "must be positive"));
        }
        if self.rate_window_seconds <= 0 {
            return Err(invalid("TRIDENT_RATE_WINDOW", &self.rate_window_seconds, "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("TRIDENT_BATCH_SIZE", &self.batch_size, "must be positive"));
        }
        Ok(())
    }

    pub fn detector_settings(&self) -> Result<DetectorSettings, DetectorError> {
        DetectorSettings::new(self.if_weight, self.ae_weight, self.anomaly_threshold)
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            window_seconds: self.rate_window_seconds,
            cache_ttl: self.feature_cache_ttl,
            cache_capacity: self.cache_capacity,
            min_baseline_samples: self.baseline.min_samples as u64,
            ..ExtractorConfig::default()
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let mut baseline = BaselineConfig::default();
        baseline.threshold.fallback = DEFAULT_ANOMALY_THRESHOLD;

        Self {
            if_weight: DEFAULT_IF_WEIGHT,
            ae_weight: DEFAULT_AE_WEIGHT,
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            feature_cache_ttl: Duration::from_secs(DEFAULT_FEATURE_CACHE_TTL),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            rate_window_seconds: DEFAULT_RATE_WINDOW_SECONDS,
            batch_size: DEFAULT_BATCH_SIZE,
            baseline,
            adaptive_threshold: true,
            model_dir: default_model_dir(),
            baseline_path: get_default_snapshot_path(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn drift_test<F>(lookup: &F) -> Result<DriftTestKind, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let sensitivity = parse_or(lookup, "TRIDENT_DRIFT_SENSITIVITY", DEFAULT_DRIFT_SENSITIVITY)?;
    let alpha = parse_or(lookup, "TRIDENT_KS_ALPHA", DEFAULT_KS_ALPHA)?;

    match lookup("TRIDENT_DRIFT_TEST").as_deref().map(str::trim) {
        None | Some("mean_shift") => Ok(DriftTestKind::MeanShift { sensitivity }),
        Some("ks") | Some("kolmogorov_smirnov") => Ok(DriftTestKind::KolmogorovSmirnov { alpha }),
        Some(other) => Err(ConfigError::Invalid {
            name: "TRIDENT_DRIFT_TEST",
            value: other.to_string(),
            reason: "expected mean_shift or ks".to_string(),
        }),
    }
}

fn invalid(name: &'static str, value: &dyn std::fmt::Display, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
