//! A non-reentrant lock with timeout support.
//!
//! `TimedLock` is the base primitive every other strand lock builds on.
//! Two wait strategies are available: parking on a condition variable with
//! a native deadline, or retrying with exponentially growing sleeps.

use log::{trace, warn};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use strand_core::utils::{SyncConfig, WaitStrategyKind};
use strand_core::Result;

use crate::raw::RawLock;
use crate::stats::{LockCounters, LockStats};

/// How a blocked acquirer waits for the lock to be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Park on a condition variable until released or the deadline passes
    #[default]
    Parking,

    /// Sleep between attempts, doubling the delay up to a cap
    Backoff {
        /// First delay
        initial: Duration,

        /// Delay cap
        max: Duration,
    },
}

impl WaitStrategy {
    /// Backoff with the default delays (500us growing to 50ms).
    pub fn backoff() -> Self {
        let defaults = SyncConfig::default();
        Self::Backoff {
            initial: defaults.backoff_initial(),
            max: defaults.backoff_max(),
        }
    }
}

impl From<&SyncConfig> for WaitStrategy {
    fn from(config: &SyncConfig) -> Self {
        match config.wait_strategy {
            WaitStrategyKind::Parking => Self::Parking,
            WaitStrategyKind::Backoff => Self::Backoff {
                initial: config.backoff_initial(),
                max: config.backoff_max(),
            },
        }
    }
}

/// A lock that may be acquired with a timeout.
///
/// The lock is not reentrant and has no notion of ownership: any thread may
/// release it.
pub struct TimedLock {
    /// Whether the lock is currently held
    held: AtomicBool,

    /// Serializes parked waiters with releasers
    gate: Mutex<()>,

    /// Signalled on every release
    released: Condvar,

    /// How blocked acquirers wait
    strategy: WaitStrategy,

    /// Statistics about lock usage
    stats: LockCounters,

    /// Name of this lock for debugging
    name: Option<String>,
}

impl TimedLock {
    /// Create a new, unheld lock that parks while waiting.
    pub fn new() -> Self {
        Self::with_strategy(WaitStrategy::Parking)
    }

    /// Create a new lock using the given wait strategy.
    pub fn with_strategy(strategy: WaitStrategy) -> Self {
        Self {
            held: AtomicBool::new(false),
            gate: Mutex::new(()),
            released: Condvar::new(),
            strategy,
            stats: LockCounters::default(),
            name: None,
        }
    }

    /// Create a new lock with a name for debugging
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new().named(name)
    }

    /// Attach a debugging name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Get the name of this lock
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The wait strategy in use.
    pub fn strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Acquire the lock.
    ///
    /// With `blocking == false` this makes a single attempt and ignores
    /// `timeout`. Otherwise it waits up to `timeout`, or indefinitely when
    /// `timeout` is `None`. Returns whether the lock was acquired.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        let start = Instant::now();

        let acquired = if self.try_take() {
            true
        } else if !blocking {
            false
        } else {
            let deadline = timeout.and_then(|t| start.checked_add(t));
            match self.strategy {
                WaitStrategy::Parking => self.wait_parked(deadline),
                WaitStrategy::Backoff { initial, max } => self.wait_backoff(deadline, initial, max),
            }
        };

        self.stats.record(acquired, start.elapsed());
        if acquired {
            trace!("Acquired lock {:?}", self.name);
        } else {
            trace!("Failed to acquire lock {:?} (timeout {:?})", self.name, timeout);
        }
        acquired
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self) -> bool {
        self.acquire(false, None)
    }

    /// Release the lock and wake one waiter.
    ///
    /// Releasing an unheld lock has no effect beyond a warning.
    pub fn release(&self) {
        if !self.held.swap(false, Ordering::Release) {
            warn!("Released lock {:?} which was not held", self.name);
            return;
        }

        if self.strategy == WaitStrategy::Parking {
            let _gate = self.gate.lock();
            self.released.notify_one();
        }
        trace!("Released lock {:?}", self.name);
    }

    /// Whether some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Get statistics about lock usage
    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }

    /// Reset lock statistics
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn try_take(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn wait_parked(&self, deadline: Option<Instant>) -> bool {
        let mut gate = self.gate.lock();
        loop {
            if self.try_take() {
                return true;
            }
            match deadline {
                None => self.released.wait(&mut gate),
                Some(deadline) => {
                    if self.released.wait_until(&mut gate, deadline).timed_out() {
                        return self.try_take();
                    }
                }
            }
        }
    }

    fn wait_backoff(&self, deadline: Option<Instant>, initial: Duration, max: Duration) -> bool {
        let mut delay = initial;
        loop {
            if self.try_take() {
                return true;
            }
            let pause = match deadline {
                None => delay,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    delay.min(deadline - now)
                }
            };
            thread::sleep(pause);
            delay = delay.saturating_mul(2).min(max);
        }
    }
}

impl Default for TimedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl RawLock for TimedLock {
    fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        TimedLock::acquire(self, blocking, timeout)
    }

    fn release(&self) -> Result<()> {
        TimedLock::release(self);
        Ok(())
    }
}
