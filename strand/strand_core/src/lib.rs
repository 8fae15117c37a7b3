//! # Strand Core
//!
//! `strand_core` provides the shared building blocks for the strand threading
//! toolkit: error kinds, identifier types, CPU sets and configuration.
//!
//! ## Crate Structure
//!
//! - **error**: Error kinds surfaced by every strand primitive
//! - **id**: Strongly-typed identifiers for threads and thread groups
//! - **cpuset**: CPU index sets with an exact, unbounded bitmask form
//! - **utils**: Configuration and log level helpers
//!
//! ## Integration with Other Strand Crates
//!
//! - **strand_sync**: Locks, monitors, semaphores and events report `Error`
//! - **strand_thread**: Managed threads carry `CpuSet` affinities and are
//!   configured through `StrandConfig`

pub mod cpuset;
pub mod error;
pub mod id;
pub mod utils;

// Re-export key types for convenience
pub use cpuset::{CpuMask, CpuSet};
pub use error::{Error, PlatformError, Result};
pub use id::{GroupId, ThreadUid};
pub use utils::{LogLevel, StrandConfig};
