//! Payload Pattern Scanner
//!
//! Regex signatures for common web attacks found in the URL, referer and user
//! agent. Counts feed the intrinsic `suspicious_pattern_count` feature.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::record::TrafficRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackPattern {
    SqlInjection,
    CrossSiteScripting,
    PathTraversal,
    CommandInjection,
}

static SIGNATURES: Lazy<Vec<(AttackPattern, Regex)>> = Lazy::new(|| {
    [
        (
            AttackPattern::SqlInjection,
            r"(?i)('\s*or\s*'[^']*'\s*=\s*')|(\bor\s+\d+\s*=\s*\d+)|(\bunion\b.*\bselect\b)|(;\s*drop\s+table)|(\bsleep\s*\(\s*\d+\s*\))|(--\s*$)",
        ),
        (
            AttackPattern::CrossSiteScripting,
            r"(?i)(<\s*script)|(javascript\s*:)|(\bon(error|load|mouseover)\s*=)|(<\s*iframe)|(<\s*img[^>]+src)",
        ),
        (
            AttackPattern::PathTraversal,
            r"(?i)(\.\./)|(\.\.\\)|(/etc/(passwd|shadow))|(c:\\windows)",
        ),
        (
            AttackPattern::CommandInjection,
            r"(?i)(;\s*(rm|cat|wget|curl|bash|sh|nc)\b)|(\|\s*(sh|bash)\b)|(\$\()|(`)|(\b(system|exec|passthru|shell_exec)\s*\()",
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| match Regex::new(pattern) {
        Ok(re) => Some((kind, re)),
        Err(e) => {
            log::error!("Invalid {:?} signature: {}", kind, e);
            None
        }
    })
    .collect()
});

static SCANNER_AGENT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(sqlmap|nikto|nmap|masscan|dirbuster|gobuster|wfuzz|wpscan|acunetix|nessus|zgrab|nuclei|havij)\b",
    )
    .map_err(|e| log::error!("Invalid scanner signature: {}", e))
    .ok()
});

/// Signatures matched in one piece of text
pub fn scan(text: &str) -> Vec<AttackPattern> {
    let decoded = percent_decode_lossy(text);
    SIGNATURES
        .iter()
        .filter(|(_, re)| re.is_match(&decoded))
        .map(|(kind, _)| *kind)
        .collect()
}

/// Distinct signatures across URL, referer and user agent
pub fn count_patterns(record: &TrafficRecord) -> usize {
    let mut found: Vec<AttackPattern> = Vec::new();
    let fields = [
        record.url.as_deref(),
        record.referer.as_deref(),
        record.user_agent(),
    ];

    for text in fields.into_iter().flatten() {
        for kind in scan(text) {
            if !found.contains(&kind) {
                found.push(kind);
            }
        }
    }

    found.len()
}

/// Known scanner / attack tool user agent
pub fn is_scanner_agent(record: &TrafficRecord) -> bool {
    match (record.user_agent(), SCANNER_AGENT.as_ref()) {
        (Some(agent), Some(re)) => re.is_match(agent),
        _ => false,
    }
}

/// Decode %XX escapes and '+' without failing on malformed input
fn percent_decode_lossy(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
