//! Window transport payload for the streaming path.
//!
//! The wire shape is fixed by existing consumers:
//!
//! ```json
//! {"deviceId": "DK3500", "readings": [{"x": 0.1, "y": 0.2, "z": 0.3, "time": 1493735870653}]}
//! ```
//!
//! The producer side builds payloads from closed windows; the consumer side
//! turns a received payload back into a feature row for inference.

use crate::core::features::{compute_sample_features, FeatureVector};
use crate::core::windowing::Window;
use crate::source::types::Sample;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One accelerometer reading inside a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Milliseconds since the Unix epoch
    pub time: i64,
}

/// Serialized form of one closed streaming window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPayload {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub readings: Vec<Reading>,
}

/// Feature vector of one window, ready for an external predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRow {
    pub device_id: String,
    /// Time of the window's first reading in milliseconds
    pub window_timestamp_ms: i64,
    /// Same instant as `window_timestamp_ms`, in UTC
    pub window_time: DateTime<Utc>,
    pub features: FeatureVector,
}

impl InferenceRow {
    /// Build a row from a device id, a representative timestamp and features.
    pub fn new(device_id: impl Into<String>, window_timestamp_ms: i64, features: FeatureVector) -> Self {
        Self {
            device_id: device_id.into(),
            window_timestamp_ms,
            window_time: millis_to_utc(window_timestamp_ms),
            features,
        }
    }
}

/// Convert epoch milliseconds to a UTC timestamp, clamping out-of-range values to the epoch.
pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

impl WindowPayload {
    /// Build the payload for a closed window.
    pub fn from_window(window: &Window) -> Self {
        Self {
            device_id: window.device_id.clone(),
            readings: window
                .samples
                .iter()
                .map(|s| Reading {
                    x: s.x,
                    y: s.y,
                    z: s.z,
                    time: s.timestamp_ms,
                })
                .collect(),
        }
    }

    /// Parse a payload from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to the compact JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Readings as samples of this payload's device.
    pub fn samples(&self) -> Vec<Sample> {
        self.readings
            .iter()
            .map(|r| Sample::new(self.device_id.clone(), r.time, r.x, r.y, r.z))
            .collect()
    }

    /// Compute the window's features, stamped with the first reading's time.
    ///
    /// Returns `None` for an empty payload.
    pub fn to_inference_row(&self) -> Option<InferenceRow> {
        let first = self.readings.first()?;
        let features = compute_sample_features(&self.samples());
        Some(InferenceRow::new(self.device_id.clone(), first.time, features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::compute_features;

    fn window() -> Window {
        Window {
            device_id: "DK3500".to_string(),
            window_start_ms: 1_493_735_870_000,
            samples: vec![
                Sample::new("DK3500", 1_493_735_870_653, 0.0, 0.5, -1.0),
                Sample::new("DK3500", 1_493_735_870_700, 0.25, 0.25, -0.75),
            ],
        }
    }

    #[test]
    fn test_wire_shape() {
        let json = WindowPayload::from_window(&window()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["deviceId"], "DK3500");
        let readings = value["readings"].as_array().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0]["time"], 1_493_735_870_653_i64);
        assert_eq!(readings[0]["y"], 0.5);
        assert_eq!(readings[1]["x"], 0.25);
        assert!(value.get("device_id").is_none());

        let keys: Vec<&String> = readings[0].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_parse_producer_json() {
        let json = r#"{"deviceId": "JB3156", "readings": [{"x": 1.0, "y": 2.0, "z": 3.0, "time": 10}]}"#;
        let payload = WindowPayload::from_json(json).unwrap();
        assert_eq!(payload.device_id, "JB3156");
        assert_eq!(payload.readings[0].time, 10);
    }

    #[test]
    fn test_inference_row_matches_window_features() {
        let w = window();
        let row = WindowPayload::from_window(&w).to_inference_row().unwrap();

        assert_eq!(row.device_id, "DK3500");
        assert_eq!(row.window_timestamp_ms, 1_493_735_870_653);
        assert_eq!(row.window_time.timestamp_millis(), 1_493_735_870_653);
        assert_eq!(row.features, compute_features(&w));
    }

    #[test]
    fn test_empty_payload_has_no_row() {
        let payload = WindowPayload {
            device_id: "D1".to_string(),
            readings: Vec::new(),
        };
        assert!(payload.to_inference_row().is_none());
    }
}
