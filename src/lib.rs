//! Sobriety Pipeline - accelerometer windows to labeled feature rows.
//!
//! This library turns raw tri-axial accelerometer readings into per-window
//! feature vectors and labels each window against a sparse reference series
//! (transdermal alcohol readings) for model training. A streaming path cuts
//! live readings into windows as they arrive and hands them to a predictor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Sobriety Pipeline                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Source    │──▶│  Windowing  │──▶│  Features   │         │
//! │  │   (CSV)     │   │  (10s bins) │   │ (27 values) │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │         │                                    │               │
//! │         ▼                                    ▼               │
//! │  ┌─────────────┐                     ┌─────────────┐         │
//! │  │  Reference  │────────────────────▶│   Labeled   │         │
//! │  │   Series    │   step lookup       │     Row     │         │
//! │  └─────────────┘                     └─────────────┘         │
//! │                                                              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Live      │──▶│  Streaming  │──▶│  Payload /  │         │
//! │  │  readings   │   │   Batcher   │   │  Predictor  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sobriety_pipeline::{pipeline::BatchPipeline, source, LabelAligner};
//! use std::path::Path;
//!
//! let batch = source::read_samples_file(Path::new("all_accelerometer_data_pids_13.csv"), &Default::default())?;
//! let series = source::load_reference_dir(Path::new("clean_tac"), source::TimeUnit::Seconds)?;
//!
//! let pipeline = BatchPipeline::new(LabelAligner::new(series, 0.08), 10_000);
//! let report = pipeline.run(batch.samples)?;
//! println!("{} labeled windows", report.rows.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod core;
pub mod inference;
pub mod pipeline;
pub mod report;
pub mod source;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, InferenceConfig};
pub use core::{
    compute_features, FeatureNaming, FeatureVector, FixedBucketPartitioner, InferenceRow,
    LabelAligner, ReferenceSeries, StreamingBatcher, Window, WindowAlignment, WindowPartitioner,
    WindowPayload,
};
pub use inference::{InferenceError, Predictor};
pub use pipeline::{BatchPipeline, LabeledRow, PipelineError, PipelineReport};
pub use report::{DeviceOutcome, DeviceStatus, RunLog, SharedRunLog};
pub use source::{Sample, SourceError};

// Inference client re-exports (when enabled)
#[cfg(feature = "inference")]
pub use inference::{BlockingInferenceClient, InferenceClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the partitioner for an alignment.
pub fn partitioner(alignment: WindowAlignment, window_size_ms: u64) -> Box<dyn WindowPartitioner> {
    match alignment {
        WindowAlignment::FixedBucket => Box::new(FixedBucketPartitioner::new(window_size_ms)),
        WindowAlignment::ArrivalDrift => Box::new(core::ArrivalPartitioner::new(window_size_ms)),
    }
}
