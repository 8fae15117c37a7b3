//! A reentrant shared/exclusive lock.
//!
//! Many threads may hold the lock shared, or one thread may hold it
//! exclusively. Holders may reenter: the exclusive holder in either mode,
//! a shared holder in shared mode. A shared holder may upgrade to
//! exclusive once every other reader has left.
//!
//! Waiting writers take precedence over new readers, so a steady stream
//! of readers cannot starve a writer. Threads that already hold the lock
//! are exempt and reenter without blocking.

use log::{error, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use strand_core::{Error, Result};

use crate::stats::{LockCounters, LockStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shared,
    Exclusive,
}

/// One thread's acquisitions, most recent last.
#[derive(Debug, Default)]
struct Holds {
    modes: Vec<Mode>,
    shared: usize,
    exclusive: usize,
}

#[derive(Debug, Default)]
struct ShState {
    holders: HashMap<ThreadId, Holds>,

    /// Threads holding at least one shared level
    readers: usize,

    writer: Option<ThreadId>,
    waiting_writers: usize,
}

impl ShState {
    fn push(&mut self, thread: ThreadId, mode: Mode) {
        let holds = self.holders.entry(thread).or_default();
        match mode {
            Mode::Shared => {
                if holds.shared == 0 {
                    self.readers += 1;
                }
                holds.shared += 1;
            }
            Mode::Exclusive => {
                holds.exclusive += 1;
                self.writer = Some(thread);
            }
        }
        holds.modes.push(mode);
    }

    fn holds_shared(&self, thread: ThreadId) -> bool {
        self.holders.get(&thread).is_some_and(|h| h.shared > 0)
    }
}

/// Options for [`SharedExclusiveLock::scoped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShAcquire {
    /// Acquire in shared mode rather than exclusive
    pub shared: bool,

    /// Wait for the lock rather than failing immediately
    pub blocking: bool,

    /// Longest time to wait when blocking
    pub timeout: Option<Duration>,
}

impl Default for ShAcquire {
    fn default() -> Self {
        Self::exclusive()
    }
}

impl ShAcquire {
    /// Blocking exclusive acquisition.
    pub fn exclusive() -> Self {
        Self {
            shared: false,
            blocking: true,
            timeout: None,
        }
    }

    /// Blocking shared acquisition.
    pub fn shared() -> Self {
        Self {
            shared: true,
            ..Self::exclusive()
        }
    }

    /// Give up after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Make a single attempt.
    pub fn nonblocking(mut self) -> Self {
        self.blocking = false;
        self
    }
}

/// Reentrant shared/exclusive lock with writer preference.
pub struct SharedExclusiveLock {
    state: Mutex<ShState>,
    changed: Condvar,
    read_stats: LockCounters,
    write_stats: LockCounters,
    name: Option<String>,
}

impl SharedExclusiveLock {
    /// Create a new, unheld lock.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ShState::default()),
            changed: Condvar::new(),
            read_stats: LockCounters::default(),
            write_stats: LockCounters::default(),
            name: None,
        }
    }

    /// Create a new lock with a name for debugging
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Get the name of this lock
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Acquire the lock in shared or exclusive mode.
    ///
    /// With `blocking == false` this makes a single attempt. Otherwise it
    /// waits up to `timeout`, or indefinitely when `timeout` is `None`.
    /// Returns whether the lock was acquired.
    pub fn acquire(&self, shared: bool, blocking: bool, timeout: Option<Duration>) -> bool {
        let me = thread::current().id();
        let start = Instant::now();
        let deadline = timeout.and_then(|t| start.checked_add(t));

        let mut state = self.state.lock();
        let acquired = if shared {
            self.acquire_shared(&mut state, me, blocking, deadline)
        } else {
            self.acquire_exclusive(&mut state, me, blocking, deadline)
        };
        drop(state);

        let stats = if shared {
            &self.read_stats
        } else {
            &self.write_stats
        };
        stats.record(acquired, start.elapsed());
        trace!(
            "{} {} lock {:?}",
            if acquired { "Acquired" } else { "Failed to acquire" },
            if shared { "shared" } else { "exclusive" },
            self.name
        );
        acquired
    }

    /// Release the most recent acquisition made by the calling thread.
    ///
    /// Fails with `Error::Ownership` if the caller holds nothing.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let ShState {
            holders,
            readers,
            writer,
            ..
        } = &mut *state;

        let holds = holders
            .get_mut(&me)
            .ok_or_else(|| Error::not_owner("release"))?;
        match holds.modes.pop() {
            Some(Mode::Shared) => {
                holds.shared -= 1;
                if holds.shared == 0 {
                    *readers -= 1;
                }
            }
            Some(Mode::Exclusive) => {
                holds.exclusive -= 1;
                if holds.exclusive == 0 {
                    *writer = None;
                }
            }
            None => return Err(Error::not_owner("release")),
        }
        if holds.modes.is_empty() {
            holders.remove(&me);
        }
        drop(state);

        self.changed.notify_all();
        trace!("Released shared/exclusive lock {:?}", self.name);
        Ok(())
    }

    /// Acquire according to `options`, returning a guard that releases on drop.
    pub fn scoped(&self, options: ShAcquire) -> Option<ShGuard<'_>> {
        self.acquire(options.shared, options.blocking, options.timeout)
            .then(|| ShGuard { lock: self })
    }

    /// Block until acquired in shared mode.
    pub fn read(&self) -> ShGuard<'_> {
        self.acquire(true, true, None);
        ShGuard { lock: self }
    }

    /// Block until acquired in exclusive mode.
    pub fn write(&self) -> ShGuard<'_> {
        self.acquire(false, true, None);
        ShGuard { lock: self }
    }

    /// Number of threads holding the lock in shared mode.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether any thread holds the lock exclusively.
    pub fn is_exclusively_held(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// The calling thread's `(shared, exclusive)` depths.
    pub fn current_depths(&self) -> (usize, usize) {
        let state = self.state.lock();
        state
            .holders
            .get(&thread::current().id())
            .map_or((0, 0), |h| (h.shared, h.exclusive))
    }

    /// Statistics for shared acquisitions
    pub fn read_stats(&self) -> LockStats {
        self.read_stats.snapshot()
    }

    /// Statistics for exclusive acquisitions
    pub fn write_stats(&self) -> LockStats {
        self.write_stats.snapshot()
    }

    /// Reset lock statistics
    pub fn reset_stats(&self) {
        self.read_stats.reset();
        self.write_stats.reset();
    }

    fn acquire_shared(
        &self,
        state: &mut MutexGuard<'_, ShState>,
        me: ThreadId,
        blocking: bool,
        deadline: Option<Instant>,
    ) -> bool {
        let reentrant = state.writer == Some(me) || state.holds_shared(me);
        if !reentrant {
            let admits = |s: &ShState| s.writer.is_none() && s.waiting_writers == 0;
            if !self.wait_until_admitted(state, blocking, deadline, admits) {
                return false;
            }
        }
        state.push(me, Mode::Shared);
        true
    }

    fn acquire_exclusive(
        &self,
        state: &mut MutexGuard<'_, ShState>,
        me: ThreadId,
        blocking: bool,
        deadline: Option<Instant>,
    ) -> bool {
        if state.writer != Some(me) {
            // An upgrading reader only waits for the others.
            let own_read = usize::from(state.holds_shared(me));
            let admits = move |s: &ShState| s.writer.is_none() && s.readers == own_read;

            state.waiting_writers += 1;
            let admitted = self.wait_until_admitted(state, blocking, deadline, admits);
            state.waiting_writers -= 1;
            if !admitted {
                // Readers held back by this writer may proceed now.
                self.changed.notify_all();
                return false;
            }
        }
        state.push(me, Mode::Exclusive);
        true
    }

    fn wait_until_admitted<F>(
        &self,
        state: &mut MutexGuard<'_, ShState>,
        blocking: bool,
        deadline: Option<Instant>,
        admits: F,
    ) -> bool
    where
        F: Fn(&ShState) -> bool,
    {
        loop {
            if admits(&**state) {
                return true;
            }
            if !blocking {
                return false;
            }
            match deadline {
                None => self.changed.wait(state),
                Some(deadline) => {
                    if self.changed.wait_until(state, deadline).timed_out() {
                        return admits(&**state);
                    }
                }
            }
        }
    }
}

impl Default for SharedExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedExclusiveLock")
            .field("name", &self.name)
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

/// Releases one level of a [`SharedExclusiveLock`] when dropped.
#[must_use = "if unused the lock will be released immediately"]
pub struct ShGuard<'a> {
    lock: &'a SharedExclusiveLock,
}

impl Drop for ShGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            error!("Failed to release shared/exclusive guard: {}", e);
        }
    }
}

impl fmt::Debug for ShGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShGuard").field("lock", &self.lock.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_readers_share() {
        let lock = Arc::new(SharedExclusiveLock::new());
        let _read = lock.read();

        let other = Arc::clone(&lock);
        let result = thread::spawn(move || {
            let shared = other.acquire(true, false, None);
            let exclusive = other.acquire(false, false, None);
            if shared {
                other.release().unwrap();
            }
            (shared, exclusive)
        })
        .join()
        .unwrap();

        assert_eq!(result, (true, false));
        assert_eq!(lock.reader_count(), 1);
    }

    #[test]
    fn test_writer_reenters_both_modes() {
        let lock = SharedExclusiveLock::new();
        assert!(lock.acquire(false, true, None));
        assert!(lock.acquire(true, false, None));
        assert!(lock.acquire(false, false, None));
        assert_eq!(lock.current_depths(), (1, 2));

        lock.release().unwrap();
        lock.release().unwrap();
        assert!(lock.is_exclusively_held());
        lock.release().unwrap();
        assert!(!lock.is_exclusively_held());
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn test_release_without_holding() {
        let lock = SharedExclusiveLock::new();
        assert!(matches!(lock.release(), Err(Error::Ownership(_))));
    }

    #[test]
    fn test_upgrade_waits_for_other_readers() {
        let lock = Arc::new(SharedExclusiveLock::new());
        assert!(lock.acquire(true, true, None));

        // Sole reader upgrades immediately.
        assert!(lock.acquire(false, false, None));
        lock.release().unwrap();

        let other = Arc::clone(&lock);
        let reader = thread::spawn(move || {
            let _read = other.read();
            thread::sleep(Duration::from_millis(50));
        });
        while lock.reader_count() < 2 {
            thread::yield_now();
        }

        let start = Instant::now();
        assert!(lock.acquire(false, true, Some(Duration::from_secs(5))));
        assert!(start.elapsed() >= Duration::from_millis(20));
        reader.join().unwrap();

        lock.release().unwrap();
        lock.release().unwrap();
        assert_eq!(lock.current_depths(), (0, 0));
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let lock = Arc::new(SharedExclusiveLock::new());
        let read = lock.read();

        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.acquire(false, true, Some(Duration::from_millis(500))))
        };
        while lock.state.lock().waiting_writers == 0 {
            thread::yield_now();
        }

        let newcomer = Arc::clone(&lock);
        let admitted = thread::spawn(move || newcomer.acquire(true, false, None))
            .join()
            .unwrap();
        assert!(!admitted);

        // The holder itself still reenters.
        assert!(lock.acquire(true, false, None));
        lock.release().unwrap();

        assert!(!writer.join().unwrap());
        drop(read);

        let newcomer = Arc::clone(&lock);
        let admitted = thread::spawn(move || {
            let admitted = newcomer.acquire(true, false, None);
            newcomer.release().unwrap();
            admitted
        })
        .join()
        .unwrap();
        assert!(admitted);
    }

    #[test]
    fn test_scoped_options() {
        let lock = SharedExclusiveLock::with_name("scoped");
        {
            let _guard = lock.scoped(ShAcquire::shared()).unwrap();
            assert_eq!(lock.reader_count(), 1);
        }
        {
            let _guard = lock
                .scoped(ShAcquire::exclusive().timeout(Duration::from_millis(10)))
                .unwrap();
            assert!(lock.is_exclusively_held());
        }
        assert_eq!(lock.current_depths(), (0, 0));
        assert_eq!(ShAcquire::default(), ShAcquire::exclusive());
        assert!(!ShAcquire::shared().nonblocking().blocking);

        assert_eq!(lock.read_stats().acquisition_count, 1);
        assert_eq!(lock.write_stats().acquisition_count, 1);
    }
}
