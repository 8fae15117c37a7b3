//! Lock usage statistics.
//!
//! Counters are updated with relaxed atomics on the acquisition path and
//! read as a consistent-enough snapshot through `LockStats`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Statistics about lock usage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockStats {
    /// Number of successful lock acquisitions
    pub acquisition_count: usize,

    /// Number of acquisitions that timed out or were refused without blocking
    pub failed_count: usize,

    /// Total time spent waiting for the lock (microseconds)
    pub total_wait_time_us: u64,

    /// Maximum time spent waiting for the lock (microseconds)
    pub max_wait_time_us: u64,
}

impl LockStats {
    /// Average wait per successful acquisition, in microseconds.
    pub fn average_wait_time_us(&self) -> f64 {
        if self.acquisition_count == 0 {
            return 0.0;
        }
        self.total_wait_time_us as f64 / self.acquisition_count as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct LockCounters {
    acquisition_count: AtomicUsize,
    failed_count: AtomicUsize,
    total_wait_time_us: AtomicU64,
    max_wait_time_us: AtomicU64,
}

impl LockCounters {
    pub(crate) fn record(&self, acquired: bool, waited: Duration) {
        if !acquired {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let wait_time_us = waited.as_micros() as u64;
        self.acquisition_count.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us
            .fetch_add(wait_time_us, Ordering::Relaxed);

        let mut current_max = self.max_wait_time_us.load(Ordering::Relaxed);
        while wait_time_us > current_max {
            match self.max_wait_time_us.compare_exchange(
                current_max,
                wait_time_us,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }

    pub(crate) fn snapshot(&self) -> LockStats {
        LockStats {
            acquisition_count: self.acquisition_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            total_wait_time_us: self.total_wait_time_us.load(Ordering::Relaxed),
            max_wait_time_us: self.max_wait_time_us.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.acquisition_count.store(0, Ordering::Relaxed);
        self.failed_count.store(0, Ordering::Relaxed);
        self.total_wait_time_us.store(0, Ordering::Relaxed);
        self.max_wait_time_us.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let counters = LockCounters::default();
        counters.record(true, Duration::from_micros(30));
        counters.record(true, Duration::from_micros(10));
        counters.record(false, Duration::from_micros(500));

        let stats = counters.snapshot();
        assert_eq!(stats.acquisition_count, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.total_wait_time_us, 40);
        assert_eq!(stats.max_wait_time_us, 30);
        assert_eq!(stats.average_wait_time_us(), 20.0);

        counters.reset();
        assert_eq!(counters.snapshot(), LockStats::default());
    }
}
