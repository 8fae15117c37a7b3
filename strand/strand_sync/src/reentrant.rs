//! A reentrant lock with timeout support.

use log::trace;
use parking_lot::Mutex;
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::Duration;

use strand_core::{Error, Result};

use crate::raw::{OwnedLock, RawLock};
use crate::stats::LockStats;
use crate::timed::{TimedLock, WaitStrategy};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// A lock that the holding thread may acquire again without blocking.
///
/// Each acquisition must be matched by a release from the same thread; the
/// lock becomes available to others once the depth returns to zero.
pub struct ReentrantLock {
    /// The lock other threads contend on
    inner: TimedLock,

    /// Current owner and its acquisition depth
    owner: Mutex<Owner>,
}

impl ReentrantLock {
    /// Create a new, unheld reentrant lock.
    pub fn new() -> Self {
        Self::with_strategy(WaitStrategy::Parking)
    }

    /// Create a new reentrant lock whose contention path uses `strategy`.
    pub fn with_strategy(strategy: WaitStrategy) -> Self {
        Self {
            inner: TimedLock::with_strategy(strategy),
            owner: Mutex::new(Owner::default()),
        }
    }

    /// Create a new reentrant lock with a name for debugging
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: TimedLock::with_name(name),
            owner: Mutex::new(Owner::default()),
        }
    }

    /// Get the name of this lock
    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    /// Acquire the lock, reentering immediately if the caller already owns it.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        let me = thread::current().id();
        {
            let mut owner = self.owner.lock();
            if owner.thread == Some(me) {
                owner.depth += 1;
                trace!("Reentered lock {:?} at depth {}", self.name(), owner.depth);
                return true;
            }
        }

        if !self.inner.acquire(blocking, timeout) {
            return false;
        }

        let mut owner = self.owner.lock();
        owner.thread = Some(me);
        owner.depth = 1;
        true
    }

    /// Release one level of ownership.
    ///
    /// Fails with `Error::Ownership` if the caller does not hold the lock.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if owner.thread != Some(me) {
            return Err(Error::not_owner("release"));
        }

        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.inner.release();
        }
        Ok(())
    }

    /// Whether the calling thread holds the lock.
    pub fn is_owned_by_current(&self) -> bool {
        self.owner.lock().thread == Some(thread::current().id())
    }

    /// How many times the calling thread holds the lock (0 if it does not).
    pub fn depth(&self) -> usize {
        let owner = self.owner.lock();
        if owner.thread == Some(thread::current().id()) {
            owner.depth
        } else {
            0
        }
    }

    /// Whether any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Get statistics about contended acquisitions
    ///
    /// Reentrant acquisitions are not counted.
    pub fn stats(&self) -> LockStats {
        self.inner.stats()
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = self.owner.lock();
        f.debug_struct("ReentrantLock")
            .field("name", &self.name())
            .field("owner", &owner.thread)
            .field("depth", &owner.depth)
            .finish()
    }
}

impl RawLock for ReentrantLock {
    fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        ReentrantLock::acquire(self, blocking, timeout)
    }

    fn release(&self) -> Result<()> {
        ReentrantLock::release(self)
    }
}

impl OwnedLock for ReentrantLock {
    fn is_owned_by_current(&self) -> bool {
        ReentrantLock::is_owned_by_current(self)
    }

    fn release_all(&self) -> Result<usize> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if owner.thread != Some(me) {
            return Err(Error::not_owner("release"));
        }

        let depth = std::mem::take(&mut owner.depth);
        owner.thread = None;
        drop(owner);
        self.inner.release();
        Ok(depth)
    }

    fn acquire_restore(&self, depth: usize) {
        self.inner.acquire(true, None);
        let mut owner = self.owner.lock();
        owner.thread = Some(thread::current().id());
        owner.depth = depth.max(1);
    }
}
