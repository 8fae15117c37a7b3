//! Run a function once after a delay.

use log::debug;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strand_core::Result;
use strand_sync::Event;

use crate::builder::ThreadBuilder;
use crate::thread::ManagedThread;

/// A managed thread that calls a function after `interval` unless cancelled.
pub struct Timer {
    thread: Arc<ManagedThread>,
    cancelled: Arc<Event>,
    interval: Duration,
}

impl Timer {
    /// Prepare a timer on a default-configured thread. Call [`start`](Self::start) to arm it.
    pub fn new<F>(interval: Duration, function: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_builder(ThreadBuilder::new(), interval, function)
    }

    /// Prepare a timer whose thread is configured by `builder`.
    pub fn with_builder<F>(builder: ThreadBuilder, interval: Duration, function: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(Event::new());
        let flag = Arc::clone(&cancelled);
        let thread = builder.build(move || {
            if flag.wait(Some(interval)) {
                debug!("Timer cancelled before firing");
                return;
            }
            function();
        })?;

        Ok(Self {
            thread,
            cancelled,
            interval,
        })
    }

    /// Start counting down.
    pub fn start(&self) -> Result<()> {
        self.thread.start()
    }

    /// Stop the timer if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.set();
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_set()
    }

    /// The delay before firing.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The thread the timer runs on.
    pub fn thread(&self) -> &Arc<ManagedThread> {
        &self.thread
    }

    /// Wait for the timer thread to finish.
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        self.thread.join(timeout)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("thread", &self.thread.name())
            .field("interval", &self.interval)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
