//! Utility types.
//!
//! Configuration and log level helpers shared by every strand crate.

pub mod config;
pub mod logging;

pub use config::{
    PlatformBackend, PlatformConfig, StrandConfig, SyncConfig, ThreadsConfig, WaitStrategyKind,
};
pub use logging::LogLevel;
