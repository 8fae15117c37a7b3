//! Condition variable with timeouts over an owned lock.
//!
//! Each waiter parks on its own pre-acquired `TimedLock` token. `notify`
//! pops tokens in FIFO order and releases them, which wakes exactly the
//! threads that were notified.

use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_core::{Error, Result};

use crate::raw::{LockGuard, OwnedLock, RawLock};
use crate::reentrant::ReentrantLock;
use crate::timed::TimedLock;

/// A condition variable bound to an ownership-tracking lock.
///
/// `wait`, `notify`, `notify_n` and `notify_all` must be called while the
/// calling thread holds the monitor's lock.
pub struct Monitor<L: OwnedLock = ReentrantLock> {
    /// The lock waiters give up while waiting
    lock: Arc<L>,

    /// Parked waiter tokens, oldest first
    waiters: Mutex<VecDeque<Arc<TimedLock>>>,
}

impl Monitor<ReentrantLock> {
    /// Create a monitor over a fresh reentrant lock.
    pub fn new() -> Self {
        Self::with_lock(Arc::new(ReentrantLock::new()))
    }
}

impl Default for Monitor<ReentrantLock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: OwnedLock> Monitor<L> {
    /// Create a monitor over an existing lock, which may be shared.
    pub fn with_lock(lock: Arc<L>) -> Self {
        Self {
            lock,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// The underlying lock.
    pub fn lock_handle(&self) -> &Arc<L> {
        &self.lock
    }

    /// Acquire the underlying lock.
    pub fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        self.lock.acquire(blocking, timeout)
    }

    /// Release one level of the underlying lock.
    pub fn release(&self) -> Result<()> {
        self.lock.release()
    }

    /// Acquire the underlying lock and return a guard releasing it.
    pub fn lock(&self) -> LockGuard<'_, L> {
        self.lock.lock()
    }

    /// Wait until notified or until `timeout` elapses.
    ///
    /// The lock is released fully while waiting and restored to the same
    /// depth before returning, whatever the outcome. Returns `true` if the
    /// waiter was notified, `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        if !self.lock.is_owned_by_current() {
            return Err(Error::not_owner("wait on"));
        }

        let token = Arc::new(TimedLock::new());
        token.acquire(true, None);
        self.waiters.lock().push_back(Arc::clone(&token));

        let depth = match self.lock.release_all() {
            Ok(depth) => depth,
            Err(e) => {
                self.withdraw(&token);
                return Err(e);
            }
        };

        let notified = token.acquire(true, timeout);
        self.lock.acquire_restore(depth);
        if notified {
            return Ok(true);
        }

        // A notifier may have popped the token just as the wait timed out.
        // Notifiers hold the lock, so with it restored the queue is settled.
        Ok(!self.withdraw(&token))
    }

    /// Wait until `predicate` returns `true` or `timeout` elapses.
    ///
    /// The predicate is evaluated with the lock held. Returns its last value.
    /// Fails with `Error::Ownership` unless the caller holds the lock.
    pub fn wait_for<F>(&self, mut predicate: F, timeout: Option<Duration>) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        if !self.lock.is_owned_by_current() {
            return Err(Error::not_owner("wait on"));
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if predicate() {
                return Ok(true);
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(deadline - now)
                }
            };
            if !self.wait(remaining)? {
                return Ok(predicate());
            }
        }
    }

    /// Wake the oldest waiter, if any.
    pub fn notify(&self) -> Result<()> {
        self.notify_n(1)
    }

    /// Wake up to `n` waiters in the order they began waiting.
    pub fn notify_n(&self, n: usize) -> Result<()> {
        if !self.lock.is_owned_by_current() {
            return Err(Error::not_owner("notify on"));
        }

        let woken: Vec<_> = {
            let mut waiters = self.waiters.lock();
            let count = n.min(waiters.len());
            waiters.drain(..count).collect()
        };
        trace!("Notifying {} monitor waiter(s)", woken.len());
        for token in woken {
            token.release();
        }
        Ok(())
    }

    /// Wake every current waiter.
    pub fn notify_all(&self) -> Result<()> {
        self.notify_n(usize::MAX)
    }

    /// Number of threads currently waiting.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Remove a token from the queue, reporting whether it was still there.
    fn withdraw(&self, token: &Arc<TimedLock>) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|t| Arc::ptr_eq(t, token)) {
            Some(index) => {
                waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<L: OwnedLock> fmt::Debug for Monitor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("waiters", &self.waiter_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn wait_for_waiters(monitor: &Monitor, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.waiter_count() < count {
            assert!(Instant::now() < deadline, "waiters never arrived");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_wait_requires_ownership() {
        let monitor = Monitor::new();
        assert!(matches!(monitor.wait(None), Err(Error::Ownership(_))));
        assert!(matches!(monitor.wait(Some(Duration::ZERO)), Err(Error::Ownership(_))));
        assert!(matches!(
            monitor.wait(Some(Duration::from_millis(10))),
            Err(Error::Ownership(_))
        ));
        assert!(matches!(monitor.wait_for(|| true, None), Err(Error::Ownership(_))));
        assert!(matches!(monitor.notify(), Err(Error::Ownership(_))));
        assert!(matches!(monitor.notify_n(2), Err(Error::Ownership(_))));
        assert!(matches!(monitor.notify_all(), Err(Error::Ownership(_))));
        assert_eq!(monitor.waiter_count(), 0);
    }

    #[test]
    fn test_wait_timeout_restores_depth() {
        let monitor = Monitor::new();
        let _outer = monitor.lock();
        let _inner = monitor.lock();

        let start = Instant::now();
        assert!(!monitor.wait(Some(Duration::from_millis(30))).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(monitor.lock_handle().depth(), 2);
        assert_eq!(monitor.waiter_count(), 0);
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let monitor = Arc::new(Monitor::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let monitor = Arc::clone(&monitor);
            let ready = Arc::clone(&ready);
            thread::spawn(move || {
                let _guard = monitor.lock();
                monitor
                    .wait_for(|| ready.load(Ordering::SeqCst), Some(Duration::from_secs(5)))
                    .unwrap()
            })
        };

        wait_for_waiters(&monitor, 1);
        {
            let _guard = monitor.lock();
            ready.store(true, Ordering::SeqCst);
            monitor.notify().unwrap();
        }
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_notify_order_is_fifo() {
        let monitor = Arc::new(Monitor::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..3 {
            let thread_monitor = Arc::clone(&monitor);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _guard = thread_monitor.lock();
                assert!(thread_monitor.wait(Some(Duration::from_secs(5))).unwrap());
                order.lock().push(id);
            }));
            wait_for_waiters(&monitor, id + 1);
        }

        for expected in 0..3 {
            {
                let _guard = monitor.lock();
                monitor.notify().unwrap();
            }
            let deadline = Instant::now() + Duration::from_secs(5);
            while order.lock().len() <= expected {
                assert!(Instant::now() < deadline);
                thread::sleep(Duration::from_millis(1));
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_notify_n_and_all() {
        let monitor = Arc::new(Monitor::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    let _guard = monitor.lock();
                    monitor.wait(Some(Duration::from_secs(5))).unwrap()
                })
            })
            .collect();
        wait_for_waiters(&monitor, 4);

        {
            let _guard = monitor.lock();
            monitor.notify_n(2).unwrap();
            assert_eq!(monitor.waiter_count(), 2);
            monitor.notify_all().unwrap();
            assert_eq!(monitor.waiter_count(), 0);
        }

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
