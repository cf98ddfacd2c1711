//! Batch pipeline across devices.
//!
//! Samples are grouped by device, sorted by time, cut into fixed-bucket
//! windows and turned into feature rows. The training path labels each
//! window against the device's reference series; the inference path stops
//! at the feature vector. Devices share no state and may run on separate
//! threads; results always come back ordered by device id.

use crate::core::features::{compute_features, FeatureNaming, FeatureVector};
use crate::core::labeling::{Label, LabelAligner};
use crate::core::payload::InferenceRow;
use crate::core::windowing::{sort_by_time, FixedBucketPartitioner, WindowPartitioner};
use crate::report::{create_shared_log, DeviceOutcome, DeviceStatus, SharedRunLog};
use crate::source::types::Sample;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Trailing columns of the labeled table, after the feature columns.
pub const LABELED_TRAILING_COLUMNS: [&str; 3] = ["device_id", "window_start_ms", "label"];

/// One labeled window of the training table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub device_id: String,
    pub window_start_ms: i64,
    pub label: Label,
    pub features: FeatureVector,
}

/// Result of a batch training run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Labeled rows, ordered by device id then window start
    pub rows: Vec<LabeledRow>,
    /// One entry per device seen in the input, ordered by device id
    pub outcomes: Vec<DeviceOutcome>,
}

impl PipelineReport {
    /// Devices that could not be labeled.
    pub fn unlabelable_devices(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == DeviceStatus::Unlabelable)
            .map(|o| o.device_id.as_str())
            .collect()
    }

    /// Number of rows labeled 1.
    pub fn positive_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.label == 1).count()
    }
}

/// Fatal pipeline errors.
#[derive(Debug)]
pub enum PipelineError {
    /// No samples at all
    NoInput,
    /// No reference series for any device
    NoReferenceData,
    /// The labeled table could not be written
    Export(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::NoInput => write!(f, "No input samples"),
            PipelineError::NoReferenceData => write!(f, "No reference data for any device"),
            PipelineError::Export(e) => write!(f, "Export error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Batch feature and label pipeline.
pub struct BatchPipeline {
    partitioner: FixedBucketPartitioner,
    aligner: LabelAligner,
    parallel: bool,
    log: SharedRunLog,
}

impl BatchPipeline {
    /// Create a pipeline labeling against `aligner` with windows of `window_size_ms`.
    pub fn new(aligner: LabelAligner, window_size_ms: u64) -> Self {
        Self {
            partitioner: FixedBucketPartitioner::new(window_size_ms),
            aligner,
            parallel: false,
            log: create_shared_log(),
        }
    }

    /// Process devices on worker threads.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Count into an existing run log.
    pub fn with_log(mut self, log: SharedRunLog) -> Self {
        self.log = log;
        self
    }

    pub fn aligner(&self) -> &LabelAligner {
        &self.aligner
    }

    pub fn log(&self) -> &SharedRunLog {
        &self.log
    }

    /// Window, featurize and label every device in `samples`.
    ///
    /// Devices without a reference series are reported as unlabelable and
    /// contribute no rows. Only empty input or an empty aligner is fatal.
    pub fn run(&self, samples: Vec<Sample>) -> Result<PipelineReport, PipelineError> {
        if samples.is_empty() {
            return Err(PipelineError::NoInput);
        }
        if self.aligner.is_empty() {
            return Err(PipelineError::NoReferenceData);
        }

        let devices = group_by_device(samples);
        tracing::info!(devices = devices.len(), "Running batch pipeline");

        let results = run_devices(devices, self.parallel, |device_id, samples| {
            self.label_device(device_id, &samples)
        });

        let mut report = PipelineReport::default();
        for (outcome, rows) in results {
            report.outcomes.push(outcome);
            report.rows.extend(rows);
        }

        tracing::info!(
            rows = report.rows.len(),
            positive = report.positive_rows(),
            unlabelable = report.unlabelable_devices().len(),
            "Batch pipeline finished"
        );
        Ok(report)
    }

    fn label_device(&self, device_id: &str, samples: &[Sample]) -> (DeviceOutcome, Vec<LabeledRow>) {
        let windows: Vec<_> = self.partitioner.partition(samples).collect();
        self.log.record_windows(windows.len() as u64);
        tracing::debug!(device_id = %device_id, windows = windows.len(), "Partitioned device");

        if self.aligner.series(device_id).is_none() {
            tracing::warn!(
                device_id = %device_id,
                windows = windows.len(),
                "No reference series; device excluded from labeled output"
            );
            self.log.record_unlabelable_device();
            let outcome = DeviceOutcome {
                device_id: device_id.to_string(),
                windows: windows.len(),
                status: DeviceStatus::Unlabelable,
            };
            return (outcome, Vec::new());
        }

        let mut rows = Vec::with_capacity(windows.len());
        for window in &windows {
            match self.aligner.label(device_id, window.window_start_ms) {
                Ok(label) => rows.push(LabeledRow {
                    device_id: device_id.to_string(),
                    window_start_ms: window.window_start_ms,
                    label,
                    features: compute_features(window),
                }),
                Err(e) => tracing::warn!(
                    device_id = %device_id,
                    window_start_ms = window.window_start_ms,
                    error = %e,
                    "Window not labeled"
                ),
            }
        }
        self.log.record_rows_labeled(rows.len() as u64);

        let outcome = DeviceOutcome {
            device_id: device_id.to_string(),
            windows: windows.len(),
            status: DeviceStatus::Labeled,
        };
        (outcome, rows)
    }
}

/// Feature rows for every fixed-bucket window, for handing to a predictor.
///
/// Each row is stamped with its window start.
pub fn inference_rows(
    samples: Vec<Sample>,
    window_size_ms: u64,
    parallel: bool,
) -> Result<Vec<InferenceRow>, PipelineError> {
    if samples.is_empty() {
        return Err(PipelineError::NoInput);
    }

    let partitioner = FixedBucketPartitioner::new(window_size_ms);
    let devices = group_by_device(samples);
    let results = run_devices(devices, parallel, |device_id, samples| {
        partitioner
            .partition(&samples)
            .map(|w| InferenceRow::new(device_id, w.window_start_ms, compute_features(&w)))
            .collect::<Vec<_>>()
    });

    Ok(results.into_iter().flatten().collect())
}

/// Split samples per device, each device's samples sorted by time.
///
/// Devices come out ordered by id.
pub fn group_by_device(samples: Vec<Sample>) -> Vec<(String, Vec<Sample>)> {
    let mut devices: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        devices
            .entry(sample.device_id.clone())
            .or_default()
            .push(sample);
    }

    devices
        .into_iter()
        .map(|(id, mut samples)| {
            sort_by_time(&mut samples);
            (id, samples)
        })
        .collect()
}

/// Apply `work` to every device, optionally on worker threads.
///
/// Output order follows the input order, which is device id order.
fn run_devices<T, F>(devices: Vec<(String, Vec<Sample>)>, parallel: bool, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(&str, Vec<Sample>) -> T + Sync,
{
    if !parallel || devices.len() < 2 {
        return devices
            .into_iter()
            .map(|(id, samples)| work(&id, samples))
            .collect();
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(devices.len());

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, String, Vec<Sample>)>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, T)>();

    for (index, (id, samples)) in devices.into_iter().enumerate() {
        // Receiver is alive in this scope
        let _ = job_tx.send((index, id, samples));
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let work = &work;
            scope.spawn(move || {
                for (index, id, samples) in job_rx.iter() {
                    if result_tx.send((index, work(&id, samples))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, T)> = result_rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Header of the labeled table.
pub fn labeled_header(naming: FeatureNaming) -> Vec<String> {
    let mut header = FeatureVector::names(naming);
    header.extend(LABELED_TRAILING_COLUMNS.iter().map(|c| c.to_string()));
    header
}

/// Write labeled rows as CSV: 27 feature columns, then device id, window start and label.
pub fn write_labeled_csv<W: Write>(
    writer: W,
    rows: &[LabeledRow],
    naming: FeatureNaming,
) -> Result<(), PipelineError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(labeled_header(naming))
        .map_err(|e| PipelineError::Export(e.to_string()))?;

    for row in rows {
        let mut record: Vec<String> = row.features.values().iter().map(|v| v.to_string()).collect();
        record.push(row.device_id.clone());
        record.push(row.window_start_ms.to_string());
        record.push(row.label.to_string());
        csv_writer
            .write_record(&record)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
    }

    csv_writer
        .flush()
        .map_err(|e| PipelineError::Export(e.to_string()))
}

/// Write labeled rows to a CSV file, creating parent directories.
pub fn write_labeled_csv_file(
    path: &Path,
    rows: &[LabeledRow],
    naming: FeatureNaming,
) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::Export(e.to_string()))?;
    }
    let file = std::fs::File::create(path).map_err(|e| PipelineError::Export(e.to_string()))?;
    write_labeled_csv(std::io::BufWriter::new(file), rows, naming)?;
    tracing::info!(path = ?path, rows = rows.len(), "Wrote labeled table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::labeling::ReferenceSeries;
    use crate::source::types::ReferencePoint;
    use std::collections::HashMap;

    fn sample(device: &str, t: i64, x: f64) -> Sample {
        Sample::new(device, t, x, x * 2.0, -x)
    }

    fn aligner(devices: &[(&str, Vec<(i64, f64)>)]) -> LabelAligner {
        let series: HashMap<String, ReferenceSeries> = devices
            .iter()
            .map(|(id, points)| {
                let points = points
                    .iter()
                    .map(|&(t, v)| ReferencePoint::new(t, v))
                    .collect();
                (id.to_string(), ReferenceSeries::new(points).unwrap())
            })
            .collect();
        LabelAligner::new(series, 0.08)
    }

    fn interleaved() -> Vec<Sample> {
        vec![
            sample("B", 25_000, 1.0),
            sample("A", 1_000, 0.5),
            sample("B", 5_000, 0.1),
            sample("A", 12_000, 0.7),
            sample("A", 3_000, 0.6),
            sample("C", 100, 0.3),
        ]
    }

    #[test]
    fn test_labels_per_window() {
        let pipeline = BatchPipeline::new(
            aligner(&[
                ("A", vec![(0, 0.02), (10_000, 0.09)]),
                ("B", vec![(0, 0.1)]),
            ]),
            10_000,
        );

        let report = pipeline.run(interleaved()).unwrap();

        let keys: Vec<(&str, i64, Label)> = report
            .rows
            .iter()
            .map(|r| (r.device_id.as_str(), r.window_start_ms, r.label))
            .collect();
        assert_eq!(
            keys,
            vec![("A", 0, 0), ("A", 10_000, 1), ("B", 0, 1), ("B", 20_000, 1)]
        );
        assert_eq!(report.positive_rows(), 3);
    }

    #[test]
    fn test_unlabelable_device_reported_not_fatal() {
        let pipeline = BatchPipeline::new(aligner(&[("A", vec![(0, 0.5)])]), 10_000);
        let report = pipeline.run(interleaved()).unwrap();

        assert_eq!(report.unlabelable_devices(), vec!["B", "C"]);
        assert!(report.rows.iter().all(|r| r.device_id == "A"));
        assert_eq!(
            report.outcomes[1],
            DeviceOutcome {
                device_id: "B".to_string(),
                windows: 2,
                status: DeviceStatus::Unlabelable,
            }
        );
        assert_eq!(pipeline.log().stats().devices_unlabelable, 2);
        assert_eq!(pipeline.log().stats().windows_emitted, 5);
    }

    #[test]
    fn test_fatal_conditions() {
        let pipeline = BatchPipeline::new(aligner(&[("A", vec![(0, 0.5)])]), 10_000);
        assert!(matches!(pipeline.run(Vec::new()), Err(PipelineError::NoInput)));

        let empty = BatchPipeline::new(LabelAligner::new(HashMap::new(), 0.08), 10_000);
        assert!(matches!(
            empty.run(interleaved()),
            Err(PipelineError::NoReferenceData)
        ));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let refs = [
            ("A", vec![(0, 0.02), (10_000, 0.09)]),
            ("B", vec![(0, 0.1)]),
            ("C", vec![(0, 0.0)]),
        ];
        let mut samples = interleaved();
        for i in 0..200 {
            samples.push(sample(&format!("D{:02}", i % 7), i * 313, (i as f64).sin()));
        }

        let sequential = BatchPipeline::new(aligner(&refs), 10_000)
            .run(samples.clone())
            .unwrap();
        let parallel = BatchPipeline::new(aligner(&refs), 10_000)
            .with_parallel(true)
            .run(samples)
            .unwrap();

        assert_eq!(sequential.rows, parallel.rows);
        assert_eq!(sequential.outcomes, parallel.outcomes);
    }

    #[test]
    fn test_inference_rows_stamped_with_window_start() {
        let rows = inference_rows(interleaved(), 10_000, false).unwrap();
        let stamps: Vec<(&str, i64)> = rows
            .iter()
            .map(|r| (r.device_id.as_str(), r.window_timestamp_ms))
            .collect();
        assert_eq!(
            stamps,
            vec![("A", 0), ("A", 10_000), ("B", 0), ("B", 20_000), ("C", 0)]
        );
        assert!(rows.iter().all(|r| r.features.is_finite()));
        assert!(matches!(
            inference_rows(Vec::new(), 10_000, true),
            Err(PipelineError::NoInput)
        ));
    }

    #[test]
    fn test_labeled_csv_layout() {
        let pipeline = BatchPipeline::new(aligner(&[("A", vec![(0, 0.5)])]), 10_000);
        let report = pipeline.run(interleaved()).unwrap();

        let mut out = Vec::new();
        write_labeled_csv(&mut out, &report.rows, FeatureNaming::Legacy).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        let header: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(header.len(), 30);
        assert_eq!(header[0], "x_mean");
        assert_eq!(header[7], "x_Kurtiosis");
        assert_eq!(&header[27..], &["device_id", "window_start_ms", "label"]);

        let first: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(first.len(), 30);
        assert_eq!(&first[27..], &["A", "0", "1"]);
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_group_by_device_sorts_each_device() {
        let groups = group_by_device(interleaved());
        let ids: Vec<&str> = groups.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        let a: Vec<i64> = groups[0].1.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(a, vec![1_000, 3_000, 12_000]);
    }
}
