//! Time sources for server-assigned snapshot timestamps.

use std::sync::Mutex;

use chrono::{Timelike, Utc};

use crate::types::Timestamp;

/// Supplies the `created_at` value for new snapshots.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock, truncated to whole milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        truncate_to_millis(Utc::now())
    }
}

/// A clock that only moves when told to. Used by tests to make version
/// ordering deterministic.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(truncate_to_millis(start)),
        }
    }

    /// Move the clock forward and return the new reading.
    pub fn advance(&self, by: chrono::Duration) -> Timestamp {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = truncate_to_millis(*current + by);
        *current
    }

    pub fn set(&self, at: Timestamp) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = truncate_to_millis(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drop sub-millisecond precision so that timestamps echoed back by clients
/// (which carry milliseconds) compare equal to the stored value.
pub fn truncate_to_millis(ts: Timestamp) -> Timestamp {
    let millis_only = (ts.nanosecond() / 1_000_000) * 1_000_000;
    ts.with_nanosecond(millis_only).unwrap_or(ts)
}
