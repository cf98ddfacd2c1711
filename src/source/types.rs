//! Sample and reference types consumed by the pipeline.
//!
//! A `Sample` is one tri-axial accelerometer reading. A `ReferencePoint` is one
//! entry of the sparse blood-alcohol proxy series used only for labeling.

use serde::{Deserialize, Serialize};

/// One accelerometer reading from a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Identifier of the wearing device
    pub device_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    pub fn new(device_id: impl Into<String>, timestamp_ms: i64, x: f64, y: f64, z: f64) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp_ms,
            x,
            y,
            z,
        }
    }

    /// Value of one axis.
    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Whether all three axis values are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Whether all three axis values lie within [`MAX_AXIS_MAGNITUDE`].
    pub fn in_range(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| v.abs() <= MAX_AXIS_MAGNITUDE)
    }
}

/// Largest axis magnitude accepted from a source.
///
/// Far beyond any physical reading; keeps every feature finite.
pub const MAX_AXIS_MAGNITUDE: f64 = 1e50;

/// Accelerometer axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in output column order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Column prefix for this axis.
    pub fn prefix(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

/// One entry of a device's reference series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Reference reading (transdermal alcohol concentration)
    pub value: f64,
}

impl ReferencePoint {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// Raw accelerometer row as it appears in a CSV source.
///
/// Every field is optional so a missing column is reported per row
/// instead of failing the whole file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawSampleRow {
    #[serde(alias = "pid", default)]
    pub device_id: Option<String>,
    #[serde(alias = "time", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

impl RawSampleRow {
    /// Validate the row into a `Sample`, or describe why it was rejected.
    pub fn into_sample(self) -> Result<Sample, String> {
        let device_id = self
            .device_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "missing device_id".to_string())?;
        let timestamp_ms = self
            .timestamp_ms
            .ok_or_else(|| "missing timestamp".to_string())?;
        let x = self.x.ok_or_else(|| "missing x".to_string())?;
        let y = self.y.ok_or_else(|| "missing y".to_string())?;
        let z = self.z.ok_or_else(|| "missing z".to_string())?;

        let sample = Sample::new(device_id.trim(), timestamp_ms, x, y, z);
        if !sample.is_finite() {
            return Err("non-finite axis value".to_string());
        }
        if !sample.in_range() {
            return Err("axis value out of range".to_string());
        }
        Ok(sample)
    }
}

/// Raw reference row as it appears in a per-device CSV file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawReferenceRow {
    #[serde(alias = "timestamp", default)]
    pub timestamp_ms: Option<i64>,
    #[serde(alias = "TAC_Reading", default)]
    pub value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(device: Option<&str>, ts: Option<i64>, x: Option<f64>) -> RawSampleRow {
        RawSampleRow {
            device_id: device.map(str::to_string),
            timestamp_ms: ts,
            x,
            y: Some(0.5),
            z: Some(-0.5),
        }
    }

    #[test]
    fn test_axis_accessor() {
        let sample = Sample::new("D1", 0, 1.0, 2.0, 3.0);
        assert_eq!(sample.axis(Axis::X), 1.0);
        assert_eq!(sample.axis(Axis::Y), 2.0);
        assert_eq!(sample.axis(Axis::Z), 3.0);
    }

    #[test]
    fn test_raw_row_validation() {
        let sample = raw(Some(" D1 "), Some(42), Some(1.0)).into_sample().unwrap();
        assert_eq!(sample.device_id, "D1");
        assert_eq!(sample.timestamp_ms, 42);

        assert_eq!(
            raw(None, Some(42), Some(1.0)).into_sample().unwrap_err(),
            "missing device_id"
        );
        assert_eq!(
            raw(Some("D1"), None, Some(1.0)).into_sample().unwrap_err(),
            "missing timestamp"
        );
        assert_eq!(
            raw(Some("D1"), Some(1), None).into_sample().unwrap_err(),
            "missing x"
        );
        assert!(raw(Some("D1"), Some(1), Some(f64::NAN))
            .into_sample()
            .is_err());
    }

    #[test]
    fn test_huge_axis_value_rejected() {
        assert_eq!(
            raw(Some("D1"), Some(1), Some(1e200)).into_sample().unwrap_err(),
            "axis value out of range"
        );
        assert_eq!(
            raw(Some("D1"), Some(1), Some(-1e51)).into_sample().unwrap_err(),
            "axis value out of range"
        );
        assert!(raw(Some("D1"), Some(1), Some(MAX_AXIS_MAGNITUDE))
            .into_sample()
            .is_ok());
    }
}
