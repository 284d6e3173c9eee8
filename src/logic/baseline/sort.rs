//! Sorted listing of baseline records
//!
//! Sort keys are a closed set; anything else is rejected when parsing.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{BaselineKey, StatsSummary};
use super::validate::BaselineError;

const SORT_KEYS: &str = "entity, metric, count, mean, std, p95, last_updated, version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSortKey {
    Entity,
    Metric,
    Count,
    Mean,
    Std,
    P95,
    LastUpdated,
    Version,
}

impl FromStr for BaselineSortKey {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entity" => Ok(BaselineSortKey::Entity),
            "metric" => Ok(BaselineSortKey::Metric),
            "count" => Ok(BaselineSortKey::Count),
            "mean" => Ok(BaselineSortKey::Mean),
            "std" => Ok(BaselineSortKey::Std),
            "p95" => Ok(BaselineSortKey::P95),
            "last_updated" => Ok(BaselineSortKey::LastUpdated),
            "version" => Ok(BaselineSortKey::Version),
            _ => Err(BaselineError::UnknownSortKey(s.to_string(), SORT_KEYS)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(BaselineError::UnknownSortOrder(s.to_string())),
        }
    }
}

/// One row of `BaselineStats::list_records`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineListing {
    pub key: BaselineKey,
    pub summary: StatsSummary,
    pub min: f64,
    pub max: f64,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
}

/// Sort in place; ties fall back to key order so output is deterministic
pub fn sort_listings(listings: &mut [BaselineListing], key: BaselineSortKey, order: SortOrder) {
    listings.sort_by(|a, b| {
        let primary = compare(a, b, key);
        let primary = match order {
            SortOrder::Ascending => primary,
            SortOrder::Descending => primary.reverse(),
        };
        primary.then_with(|| a.key.cmp(&b.key))
    });
}

fn compare(a: &BaselineListing, b: &BaselineListing, key: BaselineSortKey) -> Ordering {
    match key {
        BaselineSortKey::Entity => a.key.entity.cmp(&b.key.entity),
        BaselineSortKey::Metric => a.key.metric.cmp(&b.key.metric),
        BaselineSortKey::Count => a.summary.count.cmp(&b.summary.count),
        BaselineSortKey::Mean => a.summary.mean.total_cmp(&b.summary.mean),
        BaselineSortKey::Std => a.summary.std.total_cmp(&b.summary.std),
        BaselineSortKey::P95 => a.p95.unwrap_or(f64::NEG_INFINITY).total_cmp(&b.p95.unwrap_or(f64::NEG_INFINITY)),
        BaselineSortKey::LastUpdated => a.last_updated.cmp(&b.last_updated),
        BaselineSortKey::Version => a.version.cmp(&b.version),
    }
}
