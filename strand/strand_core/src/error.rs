//! Error types for the strand threading toolkit.
//!
//! Every error here is surfaced synchronously at the call that triggered it.
//! Timeouts are never errors: blocking calls report them by returning `false`.
//!
//! Native priority and affinity failures have their own type, `PlatformError`,
//! which the root `Error` wraps.

use thiserror::Error;

/// Root error type for strand.
#[derive(Debug, Error)]
pub enum Error {
    /// A value fell outside its domain (priority, CPU index, semaphore bound)
    #[error("Range error: {0}")]
    Range(String),

    /// A release or wait was attempted by a thread that does not hold the lock
    #[error("Ownership error: {0}")]
    Ownership(String),

    /// The object is in the wrong state for the requested operation
    #[error("State error: {0}")]
    State(String),

    /// A group-local attribute was read or deleted before being set
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    /// A native priority or affinity call failed
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// A requested process affinity is not a subset of the system affinity
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an ownership error naming the offending operation.
    pub fn not_owner(operation: &str) -> Self {
        Self::Ownership(format!("cannot {} an un-acquired lock", operation))
    }
}

/// Errors reported by a platform adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// A native call returned an error code
    #[error("{op} failed with OS error {code}")]
    Os {
        /// Name of the native call
        op: &'static str,

        /// The errno (or equivalent) reported
        code: i32,
    },

    /// A CPU index cannot be expressed in the native affinity mask
    #[error("CPU index {cpu} exceeds the native limit of {limit}")]
    CpuOutOfRange {
        /// The offending CPU index
        cpu: usize,

        /// The number of CPUs the native mask can describe
        limit: usize,
    },
}

/// Result type used throughout strand.
pub type Result<T> = std::result::Result<T, Error>;
