#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Strand Thread
//!
//! Managed threads for the strand threading toolkit.
//!
//! - **ManagedThread**: a thread with an advisory priority in `[0, 1]`, a CPU
//!   affinity, lifecycle hooks and membership in exactly one group
//! - **ThreadGroup**: all-or-nothing priority and affinity changes across
//!   its members, joint liveness and join with a shared deadline
//! - **GroupLocal**: storage shared by the threads of a group
//! - **Timer**: a function run once after a delay unless cancelled
//! - **platform**: the adapter that applies priorities and affinities natively
//!
//! Process-wide state lives in a [`Registry`], created by [`init`] or lazily
//! with default configuration.
//!
//! ## Integration with Other Strand Crates
//!
//! - **strand_core**: Errors, `CpuSet` and `StrandConfig`
//! - **strand_sync**: Timers wait on an `Event`

/// Thread configuration
pub mod builder;

/// Thread groups with atomic batch updates
pub mod group;

/// Group-keyed storage
pub mod local;

/// Native priority and affinity adapters
pub mod platform;

/// Process-wide registry
pub mod registry;

/// Managed threads and lifecycle hooks
pub mod thread;

/// Delayed one-shot functions
pub mod timer;

// Re-export key types for easier access
pub use builder::ThreadBuilder;
pub use group::ThreadGroup;
pub use local::GroupLocal;
pub use platform::{Capabilities, NativeHandle, NoopAdapter, PlatformAdapter};
pub use registry::{
    active_count, enumerate, init, process_affinity, registry, set_process_affinity, shutdown,
    system_affinity, Registry,
};
pub use thread::{current, ManagedThread, NoHooks, ThreadHooks};
pub use timer::Timer;
