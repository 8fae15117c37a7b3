//! Lock traits and the RAII guard shared by every strand lock.

use log::error;
use std::fmt;
use std::time::Duration;

use strand_core::Result;

/// A lock acquired and released explicitly, with an optional bounded wait.
pub trait RawLock: Send + Sync {
    /// Acquire the lock.
    ///
    /// With `blocking == false` this is a single attempt and `timeout` is
    /// ignored. Otherwise it waits up to `timeout` (forever if `None`).
    /// Returns whether the lock was acquired.
    fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool;

    /// Release the lock.
    fn release(&self) -> Result<()>;

    /// Acquire the lock, blocking until it is available, and return a guard.
    fn lock(&self) -> LockGuard<'_, Self>
    where
        Self: Sized,
    {
        self.acquire(true, None);
        LockGuard { lock: self }
    }

    /// Attempt to acquire the lock without blocking.
    fn try_lock(&self) -> Option<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire(false, None).then(|| LockGuard { lock: self })
    }

    /// Attempt to acquire the lock, waiting up to `timeout`.
    fn try_lock_for(&self, timeout: Duration) -> Option<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire(true, Some(timeout))
            .then(|| LockGuard { lock: self })
    }
}

/// A lock that knows which thread owns it and how deeply.
///
/// Monitors need this to fully release the lock around a wait and restore
/// the caller's acquisition depth afterwards.
pub trait OwnedLock: RawLock {
    /// Whether the calling thread currently holds the lock.
    fn is_owned_by_current(&self) -> bool;

    /// Release every level held by the calling thread, returning the depth released.
    fn release_all(&self) -> Result<usize>;

    /// Block until the lock is acquired, then restore the given depth.
    fn acquire_restore(&self, depth: usize);
}

/// Releases its lock when dropped.
#[must_use = "if unused the lock will be released immediately"]
pub struct LockGuard<'a, L: RawLock + ?Sized> {
    lock: &'a L,
}

impl<L: RawLock + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            error!("Failed to release lock guard: {}", e);
        }
    }
}

impl<L: RawLock + ?Sized> fmt::Debug for LockGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}
