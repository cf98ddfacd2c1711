//! Boundary sources for raw accelerometer rows and reference series.

pub mod csv;
pub mod types;

// Re-export commonly used types
pub use self::csv::{
    load_reference_dir, read_reference, read_samples, read_samples_file, RejectedRow,
    SampleBatch, SampleSourceOptions, SourceError, TimeUnit,
};
pub use types::{Axis, ReferencePoint, Sample};
