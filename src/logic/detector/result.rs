//! Detection Result - Ensemble verdict and detector introspection

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Verdict for one feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub isolation_forest_score: f64,
    pub autoencoder_score: f64,
    pub confidence: f64,
    pub model_agreement: bool,
}

impl DetectionResult {
    /// Field mapping used by transport layers and alert emitters
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("is_anomaly".to_string(), Value::Bool(self.is_anomaly));
        map.insert("anomaly_score".to_string(), Value::from(self.anomaly_score));
        map.insert("isolation_forest_score".to_string(), Value::from(self.isolation_forest_score));
        map.insert("autoencoder_score".to_string(), Value::from(self.autoencoder_score));
        map.insert("confidence".to_string(), Value::from(self.confidence));
        map.insert("model_agreement".to_string(), Value::Bool(self.model_agreement));
        map
    }

    /// Inverse of `to_map`
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map.clone()))
    }
}

/// Read-only snapshot of detector state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub if_initialized: bool,
    pub if_trained: bool,
    pub ae_initialized: bool,
    pub ae_trained: bool,
    pub if_weight: f64,
    pub ae_weight: f64,
    pub anomaly_threshold: f64,
    pub if_model_info: Option<Value>,
    pub ae_model_info: Option<Value>,
    pub model_version: Option<String>,
}

impl DetectorInfo {
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_map_fields() {
        let result = DetectionResult {
            is_anomaly: true,
            anomaly_score: 0.8,
            isolation_forest_score: 0.7,
            autoencoder_score: 0.9,
            confidence: 0.85,
            model_agreement: true,
        };

        let map = result.to_map();
        assert_eq!(map["is_anomaly"], true);
        assert_eq!(map["anomaly_score"], 0.8);
        assert_eq!(map["isolation_forest_score"], 0.7);
        assert_eq!(map["autoencoder_score"], 0.9);
        assert_eq!(map["confidence"], 0.85);
        assert_eq!(map["model_agreement"], true);
    }

    #[test]
    fn test_map_round_trip_is_exact() {
        let result = DetectionResult {
            is_anomaly: false,
            anomaly_score: 0.1 + 0.2,
            isolation_forest_score: 1.0 / 3.0,
            autoencoder_score: 0.269_999_999_999_999_98,
            confidence: 0.0,
            model_agreement: false,
        };

        let restored = DetectionResult::from_map(&result.to_map()).unwrap();
        assert_eq!(restored, result);
    }

    #[test]
    fn test_from_map_rejects_missing_field() {
        let mut map = DetectionResult {
            is_anomaly: true,
            anomaly_score: 0.9,
            isolation_forest_score: 0.9,
            autoencoder_score: 0.9,
            confidence: 1.0,
            model_agreement: true,
        }
        .to_map();
        map.remove("confidence");
        assert!(DetectionResult::from_map(&map).is_err());
    }
}
