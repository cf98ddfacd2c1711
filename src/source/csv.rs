//! CSV-backed sample and reference sources.
//!
//! Malformed rows are rejected one at a time and reported back to the
//! caller; only an unreadable source fails as a whole.

use crate::core::labeling::ReferenceSeries;
use crate::source::types::{RawReferenceRow, RawSampleRow, ReferencePoint, Sample};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Unit of the timestamps stored in reference files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Milliseconds,
    #[default]
    Seconds,
}

impl TimeUnit {
    /// Convert a timestamp in this unit to milliseconds.
    pub fn to_millis(self, value: i64) -> i64 {
        match self {
            TimeUnit::Milliseconds => value,
            TimeUnit::Seconds => value.saturating_mul(1000),
        }
    }
}

/// Options for reading raw accelerometer rows.
#[derive(Debug, Clone)]
pub struct SampleSourceOptions {
    /// Discard rows stamped exactly 0 (placeholder rows in recorded data)
    pub drop_zero_timestamps: bool,
}

impl Default for SampleSourceOptions {
    fn default() -> Self {
        Self {
            drop_zero_timestamps: true,
        }
    }
}

/// A row that could not be turned into a sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    /// 1-based line number in the source (header is line 1)
    pub line: u64,
    pub reason: String,
}

impl std::fmt::Display for RejectedRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Result of reading a sample source.
#[derive(Debug, Default)]
pub struct SampleBatch {
    /// Accepted samples in source order
    pub samples: Vec<Sample>,
    /// Rows rejected as malformed
    pub rejected: Vec<RejectedRow>,
    /// Rows skipped on purpose (zero timestamps)
    pub skipped: u64,
}

/// Errors for sources that cannot be read at all.
#[derive(Debug)]
pub enum SourceError {
    Io { path: PathBuf, message: String },
    Csv(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io { path, message } => write!(f, "IO error reading {path:?}: {message}"),
            SourceError::Csv(e) => write!(f, "CSV error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Read accelerometer samples from CSV data.
///
/// Required columns are `device_id` (or `pid`), `timestamp_ms` (or `time`),
/// `x`, `y` and `z`. Extra columns are ignored.
pub fn read_samples<R: Read>(
    reader: R,
    options: &SampleSourceOptions,
) -> Result<SampleBatch, SourceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    // Fail early when the header itself is unreadable.
    csv_reader
        .headers()
        .map_err(|e| SourceError::Csv(e.to_string()))?;

    let mut batch = SampleBatch::default();
    for (index, record) in csv_reader.deserialize::<RawSampleRow>().enumerate() {
        let line = index as u64 + 2;
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                reject(&mut batch, line, e.to_string());
                continue;
            }
        };

        match row.into_sample() {
            Ok(sample) if options.drop_zero_timestamps && sample.timestamp_ms == 0 => {
                batch.skipped += 1;
            }
            Ok(sample) => batch.samples.push(sample),
            Err(reason) => reject(&mut batch, line, reason),
        }
    }

    tracing::debug!(
        accepted = batch.samples.len(),
        rejected = batch.rejected.len(),
        skipped = batch.skipped,
        "Read sample source"
    );
    Ok(batch)
}

/// Read accelerometer samples from a CSV file.
pub fn read_samples_file(
    path: &Path,
    options: &SampleSourceOptions,
) -> Result<SampleBatch, SourceError> {
    let file = std::fs::File::open(path).map_err(|e| SourceError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    read_samples(std::io::BufReader::new(file), options)
}

fn reject(batch: &mut SampleBatch, line: u64, reason: String) {
    tracing::warn!(line, reason = %reason, "Rejected malformed sample row");
    batch.rejected.push(RejectedRow { line, reason });
}

/// Read one device's reference series from CSV data.
///
/// Columns are `timestamp` (or `timestamp_ms`) and `TAC_Reading` (or `value`).
/// Returns `None` when the source holds no usable rows.
pub fn read_reference<R: Read>(
    reader: R,
    unit: TimeUnit,
) -> Result<Option<ReferenceSeries>, SourceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut points = Vec::new();
    for (index, record) in csv_reader.deserialize::<RawReferenceRow>().enumerate() {
        let line = index as u64 + 2;
        match record {
            Ok(RawReferenceRow {
                timestamp_ms: Some(ts),
                value: Some(value),
            }) if value.is_finite() => {
                points.push(ReferencePoint::new(unit.to_millis(ts), value));
            }
            Ok(_) => tracing::warn!(line, "Skipped incomplete reference row"),
            Err(e) => tracing::warn!(line, error = %e, "Skipped malformed reference row"),
        }
    }

    Ok(ReferenceSeries::new(points))
}

/// Device id encoded in a reference file name: the prefix before the first `_`.
pub fn device_id_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let id = stem.split('_').next().unwrap_or(stem).trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Load every `*.csv` reference file in a directory, keyed by device id.
///
/// Files that cannot be read or hold no usable rows are logged and skipped.
pub fn load_reference_dir(
    dir: &Path,
    unit: TimeUnit,
) -> Result<HashMap<String, ReferenceSeries>, SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SourceError::Io {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut series = HashMap::new();
    for path in paths {
        let Some(device_id) = device_id_from_file_name(&path) else {
            tracing::warn!(path = ?path, "Reference file name has no device id");
            continue;
        };

        let loaded = std::fs::File::open(&path)
            .map_err(|e| SourceError::Io {
                path: path.clone(),
                message: e.to_string(),
            })
            .and_then(|file| read_reference(std::io::BufReader::new(file), unit));

        match loaded {
            Ok(Some(reference)) => {
                tracing::debug!(device_id = %device_id, points = reference.len(), "Loaded reference series");
                series.insert(device_id, reference);
            }
            Ok(None) => tracing::warn!(device_id = %device_id, "Reference file has no usable rows"),
            Err(e) => tracing::warn!(device_id = %device_id, error = %e, "Skipped reference file"),
        }
    }

    Ok(series)
}
