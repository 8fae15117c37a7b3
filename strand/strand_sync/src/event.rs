//! A boolean flag that threads can wait on.

use log::{error, trace};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::monitor::Monitor;

/// An event flag with timed waits.
pub struct Event {
    monitor: Monitor,
    flag: AtomicBool,
}

impl Event {
    /// Create an unset event.
    pub fn new() -> Self {
        Self {
            monitor: Monitor::new(),
            flag: AtomicBool::new(false),
        }
    }

    /// Whether the flag is set.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag and wake every waiter.
    pub fn set(&self) {
        let _guard = self.monitor.lock();
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.monitor.notify_all() {
            error!("Failed to wake event waiters: {}", e);
        }
        trace!("Event set");
    }

    /// Reset the flag.
    pub fn clear(&self) {
        let _guard = self.monitor.lock();
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Block until the flag is set or `timeout` elapses.
    ///
    /// Returns the flag's value on exit.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let _guard = self.monitor.lock();
        if self.is_set() {
            return true;
        }
        if let Err(e) = self.monitor.wait(timeout) {
            error!("Event wait failed: {}", e);
        }
        self.is_set()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("set", &self.is_set()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_set_and_clear() {
        let event = Event::new();
        assert!(!event.is_set());
        event.set();
        assert!(event.is_set());
        assert!(event.wait(Some(Duration::from_millis(1))));
        event.clear();
        assert!(!event.is_set());
    }

    #[test]
    fn test_wait_times_out() {
        let event = Event::new();
        let start = Instant::now();
        assert!(!event.wait(Some(Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_set_releases_all_waiters() {
        let event = Arc::new(Event::new());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait(Some(Duration::from_secs(5))))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.set();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
