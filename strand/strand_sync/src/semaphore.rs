//! Counting and bounded semaphores with timeouts.

use log::{error, trace};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use strand_core::{Error, Result};

use crate::monitor::Monitor;

/// A counting semaphore.
///
/// `acquire` blocks while the count is zero; `release` increments it and
/// wakes one waiter.
pub struct Semaphore {
    monitor: Monitor,
    value: AtomicUsize,
}

impl Semaphore {
    /// Create a semaphore with the given initial count.
    pub fn new(value: usize) -> Self {
        Self {
            monitor: Monitor::new(),
            value: AtomicUsize::new(value),
        }
    }

    /// The current count.
    pub fn value(&self) -> usize {
        self.value.load(Ordering::SeqCst)
    }

    /// Decrement the count, waiting for it to become positive.
    ///
    /// With `blocking == false` this fails immediately on a zero count.
    /// Returns `false` if `timeout` elapses first.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        let _guard = self.monitor.lock();

        let available = if !blocking {
            self.value() > 0
        } else {
            match self.monitor.wait_for(|| self.value() > 0, timeout) {
                Ok(available) => available,
                Err(e) => {
                    error!("Semaphore wait failed: {}", e);
                    false
                }
            }
        };

        if available {
            self.value.fetch_sub(1, Ordering::SeqCst);
            trace!("Semaphore acquired, {} left", self.value());
        }
        available
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self) -> bool {
        self.acquire(false, None)
    }

    /// Increment the count and wake one waiter.
    pub fn release(&self) -> Result<()> {
        self.release_below(None)
    }

    fn release_below(&self, limit: Option<usize>) -> Result<()> {
        let _guard = self.monitor.lock();
        let value = self.value();
        if let Some(limit) = limit {
            if value >= limit {
                return Err(Error::Range(format!(
                    "semaphore released too many times (limit {})",
                    limit
                )));
            }
        }
        self.value.store(value + 1, Ordering::SeqCst);
        self.monitor.notify()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value())
            .finish()
    }
}

/// A semaphore whose count may never exceed its initial value.
pub struct BoundedSemaphore {
    inner: Semaphore,
    initial_value: usize,
}

impl BoundedSemaphore {
    /// Create a bounded semaphore starting (and capped) at `value`.
    pub fn new(value: usize) -> Self {
        Self {
            inner: Semaphore::new(value),
            initial_value: value,
        }
    }

    /// The cap.
    pub fn initial_value(&self) -> usize {
        self.initial_value
    }

    /// The current count.
    pub fn value(&self) -> usize {
        self.inner.value()
    }

    /// See [`Semaphore::acquire`].
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        self.inner.acquire(blocking, timeout)
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self) -> bool {
        self.inner.try_acquire()
    }

    /// Increment the count, failing with `Error::Range` if it is already at the cap.
    pub fn release(&self) -> Result<()> {
        self.inner.release_below(Some(self.initial_value))
    }
}

impl Default for BoundedSemaphore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for BoundedSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSemaphore")
            .field("value", &self.value())
            .field("initial_value", &self.initial_value)
            .finish()
    }
}
