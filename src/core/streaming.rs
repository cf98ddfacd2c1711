//! Online windowing of a live, single-device sample stream.
//!
//! The batcher is a two-state machine. The first sample opens a window at its
//! own timestamp. A later sample at or beyond `window_start + size` closes the
//! open window (without that sample) and opens the next one at the sample's
//! timestamp. Boundaries therefore drift to the first sample after a gap,
//! unlike [`FixedBucketPartitioner`](crate::core::windowing::FixedBucketPartitioner).

use crate::core::windowing::{Window, WindowAlignment, WindowPartitioner, DEFAULT_WINDOW_SIZE_MS};
use crate::source::types::Sample;
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors raised by the streaming batcher.
#[derive(Debug, Clone, PartialEq)]
pub enum BatcherError {
    /// A sample from another device reached a single-device batcher.
    DeviceMismatch { expected: String, found: String },
}

impl std::fmt::Display for BatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatcherError::DeviceMismatch { expected, found } => {
                write!(f, "Batcher for device {expected} received a sample from {found}")
            }
        }
    }
}

impl std::error::Error for BatcherError {}

/// Current state of a batcher.
#[derive(Debug, Clone, PartialEq)]
enum BatcherState {
    NoWindowOpen,
    WindowOpen {
        window_start_ms: i64,
        batch: Vec<Sample>,
    },
}

/// How a call to [`StreamingBatcher::consume`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The input ran out; any open window was flushed.
    Exhausted,
    /// The stop flag was raised; the open window is still buffered.
    Cancelled,
}

/// Online windowing state machine for one device.
///
/// Calls must be serialized by the caller and arrive in time order.
#[derive(Debug, Clone)]
pub struct StreamingBatcher {
    device_id: Option<String>,
    window_size_ms: i64,
    state: BatcherState,
}

impl StreamingBatcher {
    /// Create a batcher that binds to the device of its first sample.
    /// A zero size is treated as 1 ms.
    pub fn new(window_size_ms: u64) -> Self {
        Self {
            device_id: None,
            window_size_ms: window_size_ms.clamp(1, i64::MAX as u64) as i64,
            state: BatcherState::NoWindowOpen,
        }
    }

    /// Create a batcher bound to `device_id` up front.
    pub fn for_device(device_id: impl Into<String>, window_size_ms: u64) -> Self {
        let mut batcher = Self::new(window_size_ms);
        batcher.device_id = Some(device_id.into());
        batcher
    }

    /// Device this batcher is bound to, if any sample has been seen.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn window_size_ms(&self) -> i64 {
        self.window_size_ms
    }

    /// Whether a window is currently open.
    pub fn is_window_open(&self) -> bool {
        matches!(self.state, BatcherState::WindowOpen { .. })
    }

    /// Start of the open window, if any.
    pub fn open_window_start_ms(&self) -> Option<i64> {
        match &self.state {
            BatcherState::WindowOpen {
                window_start_ms, ..
            } => Some(*window_start_ms),
            BatcherState::NoWindowOpen => None,
        }
    }

    /// Number of samples buffered in the open window.
    pub fn buffered(&self) -> usize {
        match &self.state {
            BatcherState::WindowOpen { batch, .. } => batch.len(),
            BatcherState::NoWindowOpen => 0,
        }
    }

    /// Feed one sample. Returns the window it closed, if any.
    pub fn push(&mut self, sample: Sample) -> Result<Option<Window>, BatcherError> {
        match &self.device_id {
            Some(expected) if *expected != sample.device_id => {
                return Err(BatcherError::DeviceMismatch {
                    expected: expected.clone(),
                    found: sample.device_id,
                });
            }
            Some(_) => {}
            None => self.device_id = Some(sample.device_id.clone()),
        }

        let state = std::mem::replace(&mut self.state, BatcherState::NoWindowOpen);
        let (closed, next) = match state {
            BatcherState::NoWindowOpen => (
                None,
                BatcherState::WindowOpen {
                    window_start_ms: sample.timestamp_ms,
                    batch: vec![sample],
                },
            ),
            BatcherState::WindowOpen {
                window_start_ms,
                mut batch,
            } => {
                if sample.timestamp_ms.saturating_sub(window_start_ms) >= self.window_size_ms {
                    let closed = self.close(window_start_ms, batch);
                    (
                        closed,
                        BatcherState::WindowOpen {
                            window_start_ms: sample.timestamp_ms,
                            batch: vec![sample],
                        },
                    )
                } else {
                    batch.push(sample);
                    (
                        None,
                        BatcherState::WindowOpen {
                            window_start_ms,
                            batch,
                        },
                    )
                }
            }
        };

        self.state = next;
        Ok(closed)
    }

    /// Close the open window at end of stream. Returns `None` if nothing is buffered.
    ///
    /// Callable at any time, independently of whether more data may follow.
    pub fn flush(&mut self) -> Option<Window> {
        match std::mem::replace(&mut self.state, BatcherState::NoWindowOpen) {
            BatcherState::WindowOpen {
                window_start_ms,
                batch,
            } => self.close(window_start_ms, batch),
            BatcherState::NoWindowOpen => None,
        }
    }

    /// Drive the batcher from `samples`, emitting each closed window synchronously.
    ///
    /// `stop` is checked before each sample is pulled, so every sample taken
    /// from `samples` reaches the batcher. On exhaustion the open window is
    /// flushed; on cancellation it stays buffered until [`flush`](Self::flush).
    pub fn consume<I, F>(
        &mut self,
        samples: I,
        stop: &AtomicBool,
        mut emit: F,
    ) -> Result<ConsumeOutcome, BatcherError>
    where
        I: IntoIterator<Item = Sample>,
        F: FnMut(Window),
    {
        let mut samples = samples.into_iter();
        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(ConsumeOutcome::Cancelled);
            }
            let Some(sample) = samples.next() else {
                break;
            };
            if let Some(window) = self.push(sample)? {
                emit(window);
            }
        }

        if let Some(window) = self.flush() {
            emit(window);
        }
        Ok(ConsumeOutcome::Exhausted)
    }

    fn close(&self, window_start_ms: i64, batch: Vec<Sample>) -> Option<Window> {
        if batch.is_empty() {
            return None;
        }
        let device_id = self.device_id.clone().unwrap_or_default();
        tracing::debug!(
            device_id = %device_id,
            window_start_ms,
            samples = batch.len(),
            "Closed streaming window"
        );
        Some(Window {
            device_id,
            window_start_ms,
            samples: batch,
        })
    }
}

impl Default for StreamingBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE_MS)
    }
}

/// Arrival-aligned partitioner over a finite slice, backed by a [`StreamingBatcher`].
#[derive(Debug, Clone)]
pub struct ArrivalPartitioner {
    window_size_ms: u64,
}

impl ArrivalPartitioner {
    pub fn new(window_size_ms: u64) -> Self {
        Self { window_size_ms }
    }
}

impl WindowPartitioner for ArrivalPartitioner {
    fn alignment(&self) -> WindowAlignment {
        WindowAlignment::ArrivalDrift
    }

    fn window_size_ms(&self) -> i64 {
        self.window_size_ms.clamp(1, i64::MAX as u64) as i64
    }

    fn partition<'a>(&'a self, samples: &'a [Sample]) -> Box<dyn Iterator<Item = Window> + 'a> {
        Box::new(ArrivalWindows {
            samples: samples.iter(),
            batcher: StreamingBatcher::new(self.window_size_ms),
        })
    }
}

struct ArrivalWindows<'a> {
    samples: std::slice::Iter<'a, Sample>,
    batcher: StreamingBatcher,
}

impl Iterator for ArrivalWindows<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        for sample in self.samples.by_ref() {
            match self.batcher.push(sample.clone()) {
                Ok(Some(window)) => return Some(window),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Skipped sample in arrival partition"),
            }
        }
        self.batcher.flush()
    }
}
