//! Run statistics and per-device outcomes.
//!
//! Counters are atomic so one log can be shared by every device worker of a
//! run. Totals can be persisted across runs as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Statistics for the current run.
#[derive(Debug)]
pub struct RunLog {
    /// Identifier of this run
    run_id: Uuid,
    /// Samples accepted from the source
    samples_read: AtomicU64,
    /// Source rows rejected as malformed
    rows_rejected: AtomicU64,
    /// Windows closed by either partitioner
    windows_emitted: AtomicU64,
    /// Windows that received a label
    rows_labeled: AtomicU64,
    /// Devices with no reference series
    devices_unlabelable: AtomicU64,
    /// Payloads handed to the transport
    payloads_sent: AtomicU64,
    /// Predictions returned by the model endpoint
    predictions: AtomicU64,
    /// Run start time
    started_at: DateTime<Utc>,
    /// Path for persisting totals
    persist_path: Option<PathBuf>,
}

impl RunLog {
    /// Create a new run log.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            samples_read: AtomicU64::new(0),
            rows_rejected: AtomicU64::new(0),
            windows_emitted: AtomicU64::new(0),
            rows_labeled: AtomicU64::new(0),
            devices_unlabelable: AtomicU64::new(0),
            payloads_sent: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a run log whose totals accumulate in `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous run stats: {e}");
        }

        log
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_samples_read(&self, count: u64) {
        self.samples_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_rejected(&self, count: u64) {
        self.rows_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_window(&self) {
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_windows(&self, count: u64) {
        self.windows_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_labeled(&self, count: u64) {
        self.rows_labeled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unlabelable_device(&self) {
        self.devices_unlabelable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_payload_sent(&self) {
        self.payloads_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id,
            samples_read: self.samples_read.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            rows_labeled: self.rows_labeled.load(Ordering::Relaxed),
            devices_unlabelable: self.devices_unlabelable.load(Ordering::Relaxed),
            payloads_sent: self.payloads_sent.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            started_at: self.started_at,
            duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Run Statistics ({}):\n\
             - Samples read: {}\n\
             - Rows rejected: {}\n\
             - Windows emitted: {}\n\
             - Rows labeled: {}\n\
             - Unlabelable devices: {}\n\
             - Payloads sent: {}\n\
             - Predictions: {}\n\
             - Duration: {} seconds",
            stats.run_id,
            stats.samples_read,
            stats.rows_rejected,
            stats.windows_emitted,
            stats.rows_labeled,
            stats.devices_unlabelable,
            stats.payloads_sent,
            stats.predictions,
            stats.duration_secs
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                samples_read: stats.samples_read,
                rows_rejected: stats.rows_rejected,
                windows_emitted: stats.windows_emitted,
                rows_labeled: stats.rows_labeled,
                devices_unlabelable: stats.devices_unlabelable,
                payloads_sent: stats.payloads_sent,
                predictions: stats.predictions,
                last_run_id: stats.run_id,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load totals from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_read
                    .store(persisted.samples_read, Ordering::Relaxed);
                self.rows_rejected
                    .store(persisted.rows_rejected, Ordering::Relaxed);
                self.windows_emitted
                    .store(persisted.windows_emitted, Ordering::Relaxed);
                self.rows_labeled
                    .store(persisted.rows_labeled, Ordering::Relaxed);
                self.devices_unlabelable
                    .store(persisted.devices_unlabelable, Ordering::Relaxed);
                self.payloads_sent
                    .store(persisted.payloads_sent, Ordering::Relaxed);
                self.predictions
                    .store(persisted.predictions, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.samples_read.store(0, Ordering::Relaxed);
        self.rows_rejected.store(0, Ordering::Relaxed);
        self.windows_emitted.store(0, Ordering::Relaxed);
        self.rows_labeled.store(0, Ordering::Relaxed);
        self.devices_unlabelable.store(0, Ordering::Relaxed);
        self.payloads_sent.store(0, Ordering::Relaxed);
        self.predictions.store(0, Ordering::Relaxed);
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of run statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub samples_read: u64,
    pub rows_rejected: u64,
    pub windows_emitted: u64,
    pub rows_labeled: u64,
    pub devices_unlabelable: u64,
    pub payloads_sent: u64,
    pub predictions: u64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
}

/// Totals format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub samples_read: u64,
    pub rows_rejected: u64,
    pub windows_emitted: u64,
    pub rows_labeled: u64,
    pub devices_unlabelable: u64,
    pub payloads_sent: u64,
    pub predictions: u64,
    pub last_run_id: Uuid,
    pub last_updated: DateTime<Utc>,
}

/// How a device fared in a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// All of the device's windows were labeled
    Labeled,
    /// The device has no reference series; its windows were excluded
    Unlabelable,
}

/// Per-device result of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device_id: String,
    /// Windows produced for the device
    pub windows: usize,
    pub status: DeviceStatus,
}

/// Thread-safe shared run log.
pub type SharedRunLog = Arc<RunLog>;

/// Create a new shared run log.
pub fn create_shared_log() -> SharedRunLog {
    Arc::new(RunLog::new())
}

/// Create a new shared run log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedRunLog {
    Arc::new(RunLog::with_persistence(path))
}
