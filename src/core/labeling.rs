//! Label alignment against a sparse reference series.
//!
//! Each window is labeled by a step-function lookup: the last reference entry
//! at or before the query time applies. Queries before the first entry clamp
//! forward to the first entry; queries at or after the last entry use the last.

use crate::source::types::ReferencePoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reference value above which a window is labeled positive.
pub const DEFAULT_LABEL_THRESHOLD: f64 = 0.08;

/// Binary window label.
pub type Label = u8;

/// A device's reference series, non-empty and ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSeries {
    points: Vec<ReferencePoint>,
}

impl ReferenceSeries {
    /// Build a series from points in any order. Returns `None` if empty.
    ///
    /// Points are stably sorted so equal timestamps keep their source order.
    pub fn new(mut points: Vec<ReferencePoint>) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        points.sort_by_key(|p| p.timestamp_ms);
        Some(Self { points })
    }

    pub fn points(&self) -> &[ReferencePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The entry that applies at time `t_ms`.
    pub fn applicable(&self, t_ms: i64) -> &ReferencePoint {
        // Index of the first entry strictly after t.
        let next = self.points.partition_point(|p| p.timestamp_ms <= t_ms);
        let index = if next == self.points.len() {
            self.points.len() - 1
        } else if next == 0 {
            0
        } else {
            next - 1
        };
        &self.points[index]
    }
}

/// Errors raised while labeling a device's windows.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelError {
    /// The device has no reference series.
    UnlabelableDevice { device_id: String },
}

impl std::fmt::Display for LabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelError::UnlabelableDevice { device_id } => {
                write!(f, "No reference series for device {device_id}")
            }
        }
    }
}

impl std::error::Error for LabelError {}

/// Maps window timestamps to binary labels. Read-only once built.
#[derive(Debug, Clone)]
pub struct LabelAligner {
    threshold: f64,
    series: HashMap<String, ReferenceSeries>,
}

impl LabelAligner {
    /// Create an aligner over per-device reference series.
    pub fn new(series: HashMap<String, ReferenceSeries>, threshold: f64) -> Self {
        Self { threshold, series }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether no device has reference data.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Number of devices with a reference series.
    pub fn device_count(&self) -> usize {
        self.series.len()
    }

    pub fn series(&self, device_id: &str) -> Option<&ReferenceSeries> {
        self.series.get(device_id)
    }

    /// Reference entry applicable to `device_id` at `t_ms`.
    pub fn lookup(&self, device_id: &str, t_ms: i64) -> Result<&ReferencePoint, LabelError> {
        self.series
            .get(device_id)
            .map(|series| series.applicable(t_ms))
            .ok_or_else(|| LabelError::UnlabelableDevice {
                device_id: device_id.to_string(),
            })
    }

    /// Label for `device_id` at `t_ms`: 1 if the applicable value exceeds the threshold.
    pub fn label(&self, device_id: &str, t_ms: i64) -> Result<Label, LabelError> {
        let point = self.lookup(device_id, t_ms)?;
        Ok(u8::from(point.value > self.threshold))
    }
}
