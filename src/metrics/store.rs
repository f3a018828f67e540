//! Latest performance snapshot and recent response times.
//!
//! The store has no policy of its own. Readers get a copy; writers mutate
//! through [`MetricsStore::update`], which holds one lock for the whole
//! closure so a reader never sees a partially applied update.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of request durations retained for averaging.
pub const RESPONSE_LOG_CAPACITY: usize = 100;

/// Point-in-time copy of system and inference metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_used_gb: f64,
    pub gpu_percent: f32,
    pub gpu_memory_used_gb: f64,
    pub total_requests: u64,
    pub active_requests: u64,
    pub avg_response_time_s: f64,
    pub tokens_per_second: f64,
    pub uptime_s: f64,
    /// When the last sampling tick was applied
    pub captured_at: DateTime<Utc>,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_used_gb: 0.0,
            gpu_percent: 0.0,
            gpu_memory_used_gb: 0.0,
            total_requests: 0,
            active_requests: 0,
            avg_response_time_s: 0.0,
            tokens_per_second: 0.0,
            uptime_s: 0.0,
            captured_at: Utc::now(),
        }
    }
}

/// Bounded FIFO of request durations in seconds.
#[derive(Debug, Clone)]
pub struct ResponseTimeLog {
    entries: VecDeque<f64>,
    capacity: usize,
}

impl Default for ResponseTimeLog {
    fn default() -> Self {
        Self::with_capacity(RESPONSE_LOG_CAPACITY)
    }
}

impl ResponseTimeLog {
    /// Capacity is clamped to `1..=RESPONSE_LOG_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, RESPONSE_LOG_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a duration, evicting the oldest entry when full.
    pub fn push(&mut self, seconds: f64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(seconds);
    }

    /// Drop everything but the most recent `capacity` entries.
    pub fn truncate_to_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.iter().sum::<f64>() / self.entries.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.entries.iter()
    }
}

struct StoreInner {
    snapshot: PerformanceSnapshot,
    response_times: ResponseTimeLog,
}

/// Mutually exclusive holder of the current snapshot.
pub struct MetricsStore {
    inner: Mutex<StoreInner>,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::with_log_capacity(RESPONSE_LOG_CAPACITY)
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                snapshot: PerformanceSnapshot::default(),
                response_times: ResponseTimeLog::with_capacity(capacity),
            }),
        }
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        self.inner.lock().snapshot
    }

    /// Apply `f` to the snapshot and log under a single lock acquisition.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut PerformanceSnapshot, &mut ResponseTimeLog) -> R,
    ) -> R {
        let mut inner = self.inner.lock();
        let StoreInner {
            snapshot,
            response_times,
        } = &mut *inner;
        f(snapshot, response_times)
    }

    pub fn response_log_len(&self) -> usize {
        self.inner.lock().response_times.len()
    }

    /// Copy of the retained durations, oldest first.
    pub fn response_times(&self) -> Vec<f64> {
        self.inner.lock().response_times.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = ResponseTimeLog::with_capacity(3);
        for s in [1.0, 2.0, 3.0, 4.0] {
            log.push(s);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert_eq!(log.mean(), Some(3.0));
    }

    #[test]
    fn test_empty_log_has_no_mean() {
        let log = ResponseTimeLog::default();
        assert!(log.is_empty());
        assert_eq!(log.mean(), None);
        assert_eq!(log.capacity(), RESPONSE_LOG_CAPACITY);
    }

    #[test]
    fn test_capacity_never_exceeds_cap() {
        let mut log = ResponseTimeLog::with_capacity(500);
        assert_eq!(log.capacity(), RESPONSE_LOG_CAPACITY);
        for i in 0..250 {
            log.push(f64::from(i));
        }
        assert_eq!(log.len(), RESPONSE_LOG_CAPACITY);
        assert_eq!(ResponseTimeLog::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_update_is_visible_in_snapshot() {
        let store = MetricsStore::new();
        store.update(|snap, log| {
            snap.total_requests = 7;
            log.push(0.5);
        });
        assert_eq!(store.snapshot().total_requests, 7);
        assert_eq!(store.response_log_len(), 1);
        assert_eq!(store.response_times(), vec![0.5]);
    }
}
