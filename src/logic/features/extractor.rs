//! Feature Extractor - Raw traffic record to layout vector
//!
//! Three families are computed: intrinsic fields of the record, trailing-window
//! rate features of its source IP, and deviation from the IP's baselines. The
//! single-record path caches each IP's window history and recomputes rates
//! from it per record; the batch path goes through the optimizer. Only the
//! history accessor may fail the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::cache::{FeatureCache, FeatureFamily};
use super::history::{HistoryAccessor, HistoryWindow};
use super::layout::{layout_hash, FEATURE_LAYOUT};
use super::optimizer::{window_features, FeatureOptimizer, RateFeatures, RateHistory};
use super::patterns;
use super::record::{EntityKey, TrafficRecord};
use super::vector::{FeatureVector, FeatureVectorBuilder};
use super::FeatureError;
use crate::constants::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_DRIFT_MIN_SAMPLES, DEFAULT_FEATURE_CACHE_TTL,
    DEFAULT_RATE_WINDOW_SECONDS, EXTRACTION_BUDGET_MS,
};
use crate::logic::baseline::{BaselineKey, BaselineMetric, BaselineStats, StatsSummary};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Trailing window for rate features
    pub window_seconds: i64,
    /// Lifetime of cached per-IP aggregates; window history never outlives the window
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Baselines with fewer samples yield zero deviation
    pub min_baseline_samples: u64,
    /// Extraction time above this is logged as a warning
    pub budget_ms: u128,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_RATE_WINDOW_SECONDS,
            cache_ttl: Duration::from_secs(DEFAULT_FEATURE_CACHE_TTL),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            min_baseline_samples: DEFAULT_DRIFT_MIN_SAMPLES as u64,
            budget_ms: EXTRACTION_BUDGET_MS,
        }
    }
}

/// Baseline statistics of one IP as used for deviation features
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DeviationBaseline {
    payload: Option<StatsSummary>,
    response: Option<StatsSummary>,
    rate: Option<StatsSummary>,
}

impl DeviationBaseline {
    /// Every metric has enough samples to stop changing meaningfully
    fn is_settled(&self, min_samples: u64) -> bool {
        [self.payload, self.response, self.rate]
            .iter()
            .all(|s| s.map_or(false, |s| s.count >= min_samples))
    }
}

// ============================================================================
// FEATURE EXTRACTOR
// ============================================================================

pub struct FeatureExtractor {
    config: ExtractorConfig,
    rate_cache: FeatureCache<RateHistory>,
    baseline_cache: FeatureCache<DeviationBaseline>,
    optimizer: FeatureOptimizer,
    baselines: Option<Arc<BaselineStats>>,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            rate_cache: FeatureCache::new(config.cache_ttl, config.cache_capacity),
            baseline_cache: FeatureCache::new(config.cache_ttl, config.cache_capacity),
            optimizer: FeatureOptimizer::new(config.window_seconds),
            baselines: None,
            config,
        }
    }

    /// Enable deviation features against a shared baseline engine
    pub fn with_baselines(mut self, baselines: Arc<BaselineStats>) -> Self {
        self.baselines = Some(baselines);
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Names of the produced vector, in order
    pub fn feature_names(&self) -> &'static [&'static str] {
        FEATURE_LAYOUT
    }

    pub fn rate_cache(&self) -> &FeatureCache<RateHistory> {
        &self.rate_cache
    }

    /// Drop cached aggregates for an entity (after a baseline refresh)
    pub fn invalidate(&self, entity: &EntityKey) {
        let removed = self.rate_cache.invalidate(entity) + self.baseline_cache.invalidate(entity);
        if removed > 0 {
            log::debug!("Invalidated {} cached feature families for {}", removed, entity);
        }
    }

    /// Drop every cached aggregate
    pub fn clear_cache(&self) {
        self.rate_cache.clear();
        self.baseline_cache.clear();
    }

    /// Extract one record
    ///
    /// `historical_records`, when given, is used as the window source directly.
    /// Otherwise the IP's cached window history is used, fetched with a single
    /// lookup on a miss or when the record's window starts outside it.
    pub fn extract_features(
        &self,
        record: &TrafficRecord,
        history: &dyn HistoryAccessor,
        historical_records: Option<&[TrafficRecord]>,
    ) -> Result<FeatureVector, FeatureError> {
        let start = Instant::now();

        let rates = match historical_records {
            Some(records) => window_features(record, records, self.config.window_seconds),
            None => self.cached_rates(record, history)?,
        };
        let vector = self.assemble(record, &rates);

        self.check_budget(start, 1);
        Ok(vector)
    }

    /// Extract a batch; output order matches input order
    pub fn extract_batch(
        &self,
        records: &[TrafficRecord],
        history: &dyn HistoryAccessor,
    ) -> Result<Vec<FeatureVector>, FeatureError> {
        let start = Instant::now();

        let rates = self
            .optimizer
            .batch_extract_rate_features(records, history, self.config.window_seconds)?;
        let vectors = records
            .iter()
            .zip(rates.iter())
            .map(|(record, (_, rate))| self.assemble(record, rate))
            .collect();

        self.check_budget(start, records.len());
        Ok(vectors)
    }

    fn cached_rates(
        &self,
        record: &TrafficRecord,
        history: &dyn HistoryAccessor,
    ) -> Result<RateFeatures, FeatureError> {
        let (Some(entity), Some(ts)) = (EntityKey::for_record(record), record.timestamp) else {
            return Ok(RateFeatures::isolated(self.config.window_seconds, record.is_error()));
        };

        let window_seconds = self.config.window_seconds;
        let window = HistoryWindow::trailing(ts, window_seconds);
        let fetch = || -> Result<RateHistory, FeatureError> {
            Ok(RateHistory::new(window, history.fetch_recent(&entity, window)?))
        };

        self.rate_cache
            .with_value(&entity, FeatureFamily::Rate, self.rate_ttl(), &fetch, |cached| {
                if !cached.reaches(&window) {
                    log::trace!("Refetching window history for {}", entity);
                    *cached = fetch()?;
                }
                let rates = window_features(record, cached.records(), window_seconds);
                cached.observe(record, &window);
                Ok(rates)
            })
    }

    fn rate_ttl(&self) -> Duration {
        let window = Duration::from_secs(self.config.window_seconds.max(1) as u64);
        self.config.cache_ttl.min(window)
    }

    fn assemble(&self, record: &TrafficRecord, rates: &RateFeatures) -> FeatureVector {
        let mut builder = FeatureVectorBuilder::with_layout(FEATURE_LAYOUT);
        write_intrinsic(record, &mut builder);
        rates.write_into(&mut builder);
        self.write_deviation(record, rates, &mut builder);

        if let Some(id) = record.id {
            builder.insert_metadata("record_id", serde_json::json!(id));
        }
        if let Some(ip) = record.source_ip() {
            builder.insert_metadata("src_ip", serde_json::json!(ip));
        }
        builder.insert_metadata("layout_hash", serde_json::json!(layout_hash()));
        builder.build()
    }

    fn write_deviation(&self, record: &TrafficRecord, rates: &RateFeatures, builder: &mut FeatureVectorBuilder) {
        let (Some(baselines), Some(entity)) = (self.baselines.as_ref(), EntityKey::for_record(record)) else {
            return;
        };

        let min = self.config.min_baseline_samples;
        let view = self
            .baseline_cache
            .get_or_compute(&entity, FeatureFamily::BaselineDeviation, self.config.cache_ttl, || {
                let summary = |metric| baselines.summary(&BaselineKey::new(entity.clone(), metric));
                let view = DeviationBaseline {
                    payload: summary(BaselineMetric::PayloadSize),
                    response: summary(BaselineMetric::ResponseTime),
                    rate: summary(BaselineMetric::RequestRate),
                };
                // Baselines still learning are read again on the next record
                if view.is_settled(min) {
                    Ok(view)
                } else {
                    Err(view)
                }
            })
            .unwrap_or_else(|view| view);

        if let Some(payload) = record.payload_size {
            builder.insert("payload_size_zscore", zscore(payload as f64, view.payload, min));
        }
        if let Some(response) = record.response_time_ms {
            builder.insert("response_time_zscore", zscore(response, view.response, min));
        }
        if let Some(rate) = view.rate.filter(|s| s.count >= min && s.mean > 0.0) {
            builder.insert("request_rate_ratio", rates.requests_per_ip / rate.mean);
        }
    }

    fn check_budget(&self, start: Instant, records: usize) {
        let elapsed = start.elapsed().as_millis();
        let per_record = elapsed / records.max(1) as u128;
        log::trace!("Extracted {} record(s) in {}ms", records, elapsed);
        if per_record > self.config.budget_ms {
            log::warn!(
                "Feature extraction over budget: {}ms per record (budget {}ms)",
                per_record,
                self.config.budget_ms
            );
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

fn zscore(value: f64, baseline: Option<StatsSummary>, min_samples: u64) -> f64 {
    match baseline {
        Some(s) if s.count >= min_samples && s.std > 0.0 => (value - s.mean) / s.std,
        _ => 0.0,
    }
}

// ============================================================================
// INTRINSIC FEATURES
// ============================================================================

/// Intrinsic features; missing fields fall back to 0.0 (method to GET)
fn write_intrinsic(record: &TrafficRecord, builder: &mut FeatureVectorBuilder) {
    builder.insert("payload_size", record.payload_size.unwrap_or(0) as f64);
    builder.insert("response_time", record.response_time_ms.unwrap_or(0.0));

    if let Some(status) = record.status_code {
        builder.insert("status_code", status as f64);
        builder.insert("is_status_200", flag(status == 200));
        builder.insert("is_client_error", flag((400..500).contains(&status)));
        builder.insert("is_server_error", flag(status >= 500));
    }

    let url = record.url.as_deref().unwrap_or("");
    builder.insert("url_length", url.chars().count() as f64);
    builder.insert(
        "url_depth",
        record.endpoint().split('/').filter(|s| !s.is_empty()).count() as f64,
    );
    builder.insert(
        "query_param_count",
        record
            .query()
            .map(|q| q.split('&').filter(|p| !p.is_empty()).count())
            .unwrap_or(0) as f64,
    );

    if let Some(ts) = record.timestamp {
        builder.insert("hour", ts.hour() as f64);
    }

    let method = record
        .method
        .as_deref()
        .map(|m| m.trim().to_ascii_uppercase())
        .unwrap_or_else(|| "GET".to_string());
    let slot = match method.as_str() {
        "GET" => "method_get",
        "POST" => "method_post",
        "PUT" => "method_put",
        "DELETE" => "method_delete",
        _ => "method_other",
    };
    builder.insert(slot, 1.0);

    builder.insert("header_count", record.headers.len() as f64);
    builder.insert(
        "user_agent_length",
        record.user_agent().map(|ua| ua.chars().count()).unwrap_or(0) as f64,
    );
    let has_referer = record.referer.as_deref().map(|r| !r.trim().is_empty()).unwrap_or(false)
        || record.headers.keys().any(|k| k.eq_ignore_ascii_case("referer"));
    builder.insert("has_referer", flag(has_referer));
    builder.insert("suspicious_pattern_count", patterns::count_patterns(record) as f64);
    builder.insert("is_scanner_agent", flag(patterns::is_scanner_agent(record)));
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
