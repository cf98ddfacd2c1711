//! Reporting of what a run did: counters and per-device outcomes.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, DeviceOutcome, DeviceStatus,
    PersistedStats, RunLog, RunStats, SharedRunLog,
};
