//! Feature Layout - Ordered schema of the extracted vector
//!
//! Adapters are trained against this exact order. Adding, removing or
//! reordering a name bumps `FEATURE_VERSION`, which changes `layout_hash()`
//! so vectors from different layouts can be told apart in logs.

use crc32fast::Hasher;

pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// LAYOUT
// ============================================================================

pub const FEATURE_LAYOUT: &[&str] = &[
    // === Intrinsic: sizes & timing (0-1) ===
    "payload_size",          // 0: Request payload bytes
    "response_time",         // 1: Response time in ms

    // === Intrinsic: status (2-5) ===
    "status_code",           // 2: Raw status code
    "is_status_200",         // 3: 1.0 if status == 200
    "is_client_error",       // 4: 1.0 if 400 <= status < 500
    "is_server_error",       // 5: 1.0 if status >= 500

    // === Intrinsic: URL (6-8) ===
    "url_length",            // 6: Full URL length
    "url_depth",             // 7: Number of path segments
    "query_param_count",     // 8: Number of query parameters

    // === Intrinsic: time (9) ===
    "hour",                  // 9: Hour of day (UTC)

    // === Intrinsic: method one-hot (10-14) ===
    "method_get",            // 10
    "method_post",           // 11
    "method_put",            // 12
    "method_delete",         // 13
    "method_other",          // 14

    // === Intrinsic: client (15-19) ===
    "header_count",          // 15: Number of headers
    "user_agent_length",     // 16: User agent length
    "has_referer",           // 17: 1.0 if a referer is present
    "suspicious_pattern_count", // 18: Attack signatures found in URL/referer/UA
    "is_scanner_agent",      // 19: 1.0 if UA matches a known scanner

    // === Rate: trailing window per source IP (20-24) ===
    "requests_per_ip",       // 20: Requests from this IP in window (incl. current)
    "requests_per_endpoint", // 21: Requests from this IP to this endpoint
    "unique_endpoints",      // 22: Distinct endpoints hit by this IP
    "avg_inter_arrival",     // 23: Mean seconds between requests
    "error_rate",            // 24: Fraction of window requests with status >= 400

    // === Baseline deviation (25-27) ===
    "payload_size_zscore",   // 25: (payload - mean) / std for this IP
    "response_time_zscore",  // 26: (response - mean) / std for this IP
    "request_rate_ratio",    // 27: requests_per_ip / baseline mean rate
];

pub const FEATURE_COUNT: usize = 28;

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 over an ordered list of feature names
///
/// Used both for the extractor layout and for arbitrary vectors handed to the
/// detector, so two schemas compare equal only if names and order match.
pub fn schema_hash<S: AsRef<str>>(names: &[S]) -> u32 {
    let mut hasher = Hasher::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

/// Version-salted hash of the extractor layout, stamped into vector metadata
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    hasher.update(&schema_hash(FEATURE_LAYOUT).to_le_bytes());
    hasher.finalize()
}

/// Owned copy of the layout names, as adapters store them
pub fn layout_names() -> Vec<String> {
    FEATURE_LAYOUT.iter().map(|s| s.to_string()).collect()
}

/// Position of a layout feature
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

// ============================================================================
// TESTS
// ============================================================================
