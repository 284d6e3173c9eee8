//! Traffic Record - Raw input of the feature stage
//!
//! Every field is optional: traffic data is noisy and the extractor substitutes
//! documented defaults instead of failing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TRAFFIC RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficRecord {
    pub id: Option<u64>,
    pub src_ip: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<u16>,
    pub payload_size: Option<u64>,
    pub response_time_ms: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl TrafficRecord {
    /// Source IP, if present and non-blank
    pub fn source_ip(&self) -> Option<&str> {
        self.src_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }

    /// URL path without the query string ("" when the URL is missing)
    pub fn endpoint(&self) -> &str {
        let url = self.url.as_deref().unwrap_or("");
        url.split(['?', '#']).next().unwrap_or("")
    }

    /// Query string without the leading '?'
    pub fn query(&self) -> Option<&str> {
        let url = self.url.as_deref()?;
        let (_, rest) = url.split_once('?')?;
        Some(rest.split('#').next().unwrap_or(""))
    }

    /// Status >= 400
    pub fn is_error(&self) -> bool {
        self.status_code.map(|s| s >= 400).unwrap_or(false)
    }

    /// User agent from the dedicated field, falling back to the header map
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref().or_else(|| {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
                .map(|(_, v)| v.as_str())
        })
    }
}

// ============================================================================
// ENTITY KEY
// ============================================================================

/// Identifier used to group traffic for rate and baseline purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
    Global,
    SourceIp { ip: String },
    Endpoint { path: String },
    IpEndpoint { ip: String, path: String },
}

impl EntityKey {
    pub fn source_ip(ip: impl Into<String>) -> Self {
        EntityKey::SourceIp { ip: ip.into() }
    }

    pub fn endpoint(path: impl Into<String>) -> Self {
        EntityKey::Endpoint { path: path.into() }
    }

    pub fn ip_endpoint(ip: impl Into<String>, path: impl Into<String>) -> Self {
        EntityKey::IpEndpoint { ip: ip.into(), path: path.into() }
    }

    /// Entity of a record's source IP, if the record has one
    pub fn for_record(record: &TrafficRecord) -> Option<Self> {
        record.source_ip().map(Self::source_ip)
    }

    /// Whether a record belongs to this entity
    pub fn matches(&self, record: &TrafficRecord) -> bool {
        match self {
            EntityKey::Global => true,
            EntityKey::SourceIp { ip } => record.source_ip() == Some(ip.as_str()),
            EntityKey::Endpoint { path } => record.endpoint() == path,
            EntityKey::IpEndpoint { ip, path } => {
                record.source_ip() == Some(ip.as_str()) && record.endpoint() == path
            }
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Global => write!(f, "global"),
            EntityKey::SourceIp { ip } => write!(f, "ip:{}", ip),
            EntityKey::Endpoint { path } => write!(f, "endpoint:{}", path),
            EntityKey::IpEndpoint { ip, path } => write!(f, "ip:{}|endpoint:{}", ip, path),
        }
    }
}

// ============================================================================
// RECORD IDENTITY
// ============================================================================

/// Position of a record inside a batch plus its id, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub index: usize,
    pub id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_query() {
        let record = TrafficRecord {
            url: Some("/api/users?page=2#top".to_string()),
            ..Default::default()
        };
        assert_eq!(record.endpoint(), "/api/users");
        assert_eq!(record.query(), Some("page=2"));
    }

    #[test]
    fn test_missing_fields_default() {
        let record: TrafficRecord = serde_json::from_str(r#"{"src_ip": "  "}"#).unwrap();
        assert_eq!(record.source_ip(), None);
        assert_eq!(record.endpoint(), "");
        assert!(!record.is_error());
    }

    #[test]
    fn test_user_agent_header_fallback() {
        let mut record = TrafficRecord::default();
        record.headers.insert("User-Agent".into(), "sqlmap/1.0".into());
        assert_eq!(record.user_agent(), Some("sqlmap/1.0"));
    }

    #[test]
    fn test_entity_keys_do_not_collide() {
        let ip = EntityKey::source_ip("10.0.0.1");
        let path = EntityKey::endpoint("10.0.0.1");
        assert_ne!(ip, path);
        assert_eq!(ip.to_string(), "ip:10.0.0.1");

        let record = TrafficRecord {
            src_ip: Some("10.0.0.1".into()),
            url: Some("/login?next=/".into()),
            ..Default::default()
        };
        assert!(EntityKey::ip_endpoint("10.0.0.1", "/login").matches(&record));
        assert!(!EntityKey::ip_endpoint("10.0.0.2", "/login").matches(&record));
    }
}
