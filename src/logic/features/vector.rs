//! Feature Vector - Core data structure for model input
//!
//! Ordered name → value mapping plus metadata that never reaches the models.
//! Values are always finite: NaN/∞ are imputed to 0.0 at construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::layout::{schema_hash, FEATURE_LAYOUT};

/// Value substituted for missing or non-finite inputs
pub const DEFAULT_FEATURE_VALUE: f64 = 0.0;

// ============================================================================
// FEATURE VECTOR
// ============================================================================

/// Immutable feature record
///
/// Build with `FeatureVectorBuilder`; there are no mutators once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl FeatureVector {
    /// Create from (name, value) pairs; later duplicates overwrite earlier ones
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut builder = FeatureVectorBuilder::new();
        for (name, value) in pairs {
            builder.insert(name, value);
        }
        builder.build()
    }

    /// Feature names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Feature values in order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get feature by name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// Iterate (name, value) in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Align values to an adapter's expected order; missing names → 0.0
    pub fn to_array<S: AsRef<str>>(&self, order: &[S]) -> Vec<f64> {
        if self.has_schema(order) {
            return self.values.clone();
        }
        order
            .iter()
            .map(|name| self.get(name.as_ref()).unwrap_or(DEFAULT_FEATURE_VALUE))
            .collect()
    }

    /// CRC32 of the ordered feature names
    pub fn schema_hash(&self) -> u32 {
        schema_hash(&self.names)
    }

    /// True if names match `order` exactly (same names, same order)
    pub fn has_schema<S: AsRef<str>>(&self, order: &[S]) -> bool {
        self.names.len() == order.len()
            && self.names.iter().zip(order).all(|(a, b)| a == b.as_ref())
    }

    /// True if this vector follows the extractor layout
    pub fn is_layout_vector(&self) -> bool {
        self.has_schema(FEATURE_LAYOUT)
    }

    /// Debug dump with hash, raw values and named values
    pub fn to_log_entry(&self) -> serde_json::Value {
        serde_json::json!({
            "schema_hash": self.schema_hash(),
            "values": self.values,
            "named_values": self.iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect::<BTreeMap<_, _>>(),
            "metadata": self.metadata,
        })
    }
}

// ============================================================================
// BUILDER PATTERN
// ============================================================================

/// Assembles a `FeatureVector`, either free-form or against a fixed layout
#[derive(Debug, Clone, Default)]
pub struct FeatureVectorBuilder {
    names: Vec<String>,
    values: Vec<f64>,
    metadata: BTreeMap<String, serde_json::Value>,
    fixed: bool,
}

impl FeatureVectorBuilder {
    /// Free-form builder: unknown names are appended
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed-schema builder: every name starts at 0.0, unknown names are ignored
    pub fn with_layout<S: AsRef<str>>(layout: &[S]) -> Self {
        Self {
            names: layout.iter().map(|s| s.as_ref().to_string()).collect(),
            values: vec![DEFAULT_FEATURE_VALUE; layout.len()],
            metadata: BTreeMap::new(),
            fixed: true,
        }
    }

    /// Set feature by name; returns false if a fixed layout lacks the name
    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> bool {
        let name = name.into();
        let value = if value.is_finite() { value } else { DEFAULT_FEATURE_VALUE };

        if let Some(i) = self.names.iter().position(|n| *n == name) {
            self.values[i] = value;
            true
        } else if self.fixed {
            log::trace!("Ignoring feature '{}' outside fixed layout", name);
            false
        } else {
            self.names.push(name);
            self.values.push(value);
            true
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.insert_metadata(key, value);
        self
    }

    pub fn build(self) -> FeatureVector {
        FeatureVector {
            names: self.names,
            values: self.values,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
