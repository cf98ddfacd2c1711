//! Partitioning of a device's sample stream into fixed-duration windows.
//!
//! Two alignment strategies exist and are never merged silently:
//! - [`WindowAlignment::FixedBucket`]: windows snap to multiples of the window
//!   size in absolute time (`floor(t / size) * size`). Used by the batch path.
//! - [`WindowAlignment::ArrivalDrift`]: a window opens at the first sample after
//!   the previous one closed, so boundaries drift after gaps. Used by the
//!   streaming path, see [`crate::core::streaming`].

use crate::source::types::{Axis, Sample};
use serde::{Deserialize, Serialize};

/// Default window duration (10 seconds).
pub const DEFAULT_WINDOW_SIZE_MS: u64 = 10_000;

/// A closed window of samples from one device. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Device the samples belong to
    pub device_id: String,
    /// Start of the window in milliseconds since the Unix epoch
    pub window_start_ms: i64,
    /// Samples in time order
    pub samples: Vec<Sample>,
}

impl Window {
    /// Number of samples in this window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Values of one axis in sample order.
    pub fn axis_values(&self, axis: Axis) -> Vec<f64> {
        self.samples.iter().map(|s| s.axis(axis)).collect()
    }
}

/// Which boundary semantics a partitioner implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAlignment {
    /// Boundaries at absolute multiples of the window size
    FixedBucket,
    /// Boundaries at the first sample after the previous window closed
    ArrivalDrift,
}

/// Splits one device's time-ordered samples into windows.
///
/// Implementations must cover the whole input: every sample lands in exactly
/// one window and no window is empty.
pub trait WindowPartitioner {
    /// Boundary semantics of this partitioner.
    fn alignment(&self) -> WindowAlignment;

    /// Window duration in milliseconds.
    fn window_size_ms(&self) -> i64;

    /// Lazily partition `samples`, which must all belong to one device and be
    /// in time order.
    fn partition<'a>(&'a self, samples: &'a [Sample]) -> Box<dyn Iterator<Item = Window> + 'a>;
}

/// Bucket key of a timestamp: `floor(t / size)`.
pub fn bucket_key(timestamp_ms: i64, window_size_ms: i64) -> i64 {
    timestamp_ms.div_euclid(window_size_ms)
}

/// Start of the bucket containing a timestamp.
pub fn bucket_start(timestamp_ms: i64, window_size_ms: i64) -> i64 {
    bucket_key(timestamp_ms, window_size_ms) * window_size_ms
}

/// Batch windowing engine with absolute, gap-tolerant boundaries.
///
/// Buckets are cut from contiguous runs of equal key, so input must be in
/// time order (see [`sort_by_time`]). Unsorted input would split one bucket
/// into several windows sharing a `window_start_ms`; debug builds assert
/// against it.
#[derive(Debug, Clone)]
pub struct FixedBucketPartitioner {
    window_size_ms: i64,
}

impl FixedBucketPartitioner {
    /// Create a partitioner. A zero size is treated as 1 ms.
    pub fn new(window_size_ms: u64) -> Self {
        Self {
            window_size_ms: window_size_ms.clamp(1, i64::MAX as u64) as i64,
        }
    }
}

impl Default for FixedBucketPartitioner {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE_MS)
    }
}

impl WindowPartitioner for FixedBucketPartitioner {
    fn alignment(&self) -> WindowAlignment {
        WindowAlignment::FixedBucket
    }

    fn window_size_ms(&self) -> i64 {
        self.window_size_ms
    }

    fn partition<'a>(&'a self, samples: &'a [Sample]) -> Box<dyn Iterator<Item = Window> + 'a> {
        Box::new(BucketWindows {
            samples,
            window_size_ms: self.window_size_ms,
        })
    }
}

/// Lazy iterator over fixed-bucket windows of a time-ordered slice.
struct BucketWindows<'a> {
    samples: &'a [Sample],
    window_size_ms: i64,
}

impl Iterator for BucketWindows<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let first = self.samples.first()?;
        let key = bucket_key(first.timestamp_ms, self.window_size_ms);

        // Time order makes every bucket one contiguous run.
        let run = self
            .samples
            .iter()
            .take_while(|s| bucket_key(s.timestamp_ms, self.window_size_ms) == key)
            .count();
        let (head, tail) = self.samples.split_at(run);
        debug_assert!(
            tail.first()
                .map_or(true, |next| bucket_key(next.timestamp_ms, self.window_size_ms) > key),
            "samples must be in time order before fixed-bucket partitioning"
        );
        self.samples = tail;

        Some(Window {
            device_id: first.device_id.clone(),
            window_start_ms: key * self.window_size_ms,
            samples: head.to_vec(),
        })
    }
}

/// Stable sort by timestamp, the precondition of every partitioner.
pub fn sort_by_time(samples: &mut [Sample]) {
    samples.sort_by_key(|s| s.timestamp_ms);
}
