#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Strand Sync
//!
//! Timeout-aware synchronization primitives for the strand threading toolkit.
//!
//! Every blocking operation takes a `blocking` flag and an optional timeout.
//! A timeout is reported by returning `false`, never as an error; errors are
//! reserved for misuse such as releasing a lock the caller does not hold.
//!
//! - **TimedLock**: non-reentrant lock, the base for everything else
//! - **ReentrantLock**: lock the owner may re-acquire
//! - **Monitor**: condition variable with FIFO notification
//! - **Semaphore** / **BoundedSemaphore**: counting semaphores
//! - **Event**: settable flag threads can wait on
//! - **SharedExclusiveLock**: reentrant reader/writer lock with upgrades
//!
//! ## Integration with Other Strand Crates
//!
//! - **strand_core**: Errors and the `[sync]` configuration section
//! - **strand_thread**: Thread completion and timers are built on `Event`

/// Lock traits and RAII guards
pub mod raw;

/// Lock usage statistics
pub mod stats;

/// Non-reentrant timed lock and wait strategies
pub mod timed;

/// Reentrant timed lock
pub mod reentrant;

/// Condition variable over an owned lock
pub mod monitor;

/// Counting and bounded semaphores
pub mod semaphore;

/// Event flag
pub mod event;

/// Reentrant shared/exclusive lock
pub mod shlock;

// Re-export key types for easier access
pub use event::Event;
pub use monitor::Monitor;
pub use raw::{LockGuard, OwnedLock, RawLock};
pub use reentrant::ReentrantLock;
pub use semaphore::{BoundedSemaphore, Semaphore};
pub use shlock::{ShAcquire, ShGuard, SharedExclusiveLock};
pub use stats::LockStats;
pub use timed::{TimedLock, WaitStrategy};
