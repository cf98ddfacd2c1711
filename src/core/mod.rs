//! Core functionality for the sobriety pipeline.
//!
//! This module contains:
//! - Fixed-bucket and arrival-aligned windowing of sample streams
//! - Feature computation from windows
//! - Label alignment against reference series
//! - The window transport payload

pub mod features;
pub mod labeling;
pub mod payload;
pub mod streaming;
pub mod windowing;

// Re-export commonly used types
pub use features::{
    compute_axis_features, compute_features, compute_sample_features, AxisFeatures,
    FeatureNaming, FeatureVector, FEATURE_COUNT, FEATURE_SUFFIXES,
};
pub use labeling::{Label, LabelAligner, LabelError, ReferenceSeries, DEFAULT_LABEL_THRESHOLD};
pub use payload::{InferenceRow, Reading, WindowPayload};
pub use streaming::{ArrivalPartitioner, BatcherError, ConsumeOutcome, StreamingBatcher};
pub use windowing::{
    FixedBucketPartitioner, Window, WindowAlignment, WindowPartitioner, DEFAULT_WINDOW_SIZE_MS,
};
