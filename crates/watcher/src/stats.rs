//! Session statistics

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug)]
struct Inner {
    update_count: u64,
    error_count: u64,
    start_time: Instant,
    last_update: Option<SystemTime>,
}

/// Counters shared by the watcher, the updater and the daemon
#[derive(Debug)]
pub struct SessionStats {
    inner: Mutex<Inner>,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub update_count: u64,
    pub error_count: u64,
    pub uptime: Duration,
    pub last_update: Option<SystemTime>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                update_count: 0,
                error_count: 0,
                start_time: Instant::now(),
                last_update: None,
            }),
        }
    }

    /// Count one successful generation pass
    pub fn record_update(&self) {
        let mut inner = self.inner.lock();
        inner.update_count += 1;
        inner.last_update = Some(SystemTime::now());
    }

    pub fn record_error(&self) {
        self.inner.lock().error_count += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        StatsSnapshot {
            update_count: inner.update_count,
            error_count: inner.error_count,
            uptime: inner.start_time.elapsed(),
            last_update: inner.last_update,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
