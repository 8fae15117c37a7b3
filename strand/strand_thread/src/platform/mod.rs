//! Native priority and CPU affinity control.
//!
//! A `PlatformAdapter` is chosen once, when the registry is created, and
//! shared by every managed thread. What it can actually do is discoverable
//! through `capabilities()`: an adapter that lacks a capability accepts the
//! corresponding calls and does nothing.

use bitflags::bitflags;
use log::{debug, warn};
use std::fmt;
use std::sync::Arc;

use strand_core::utils::PlatformBackend;
use strand_core::{CpuSet, PlatformError};

pub mod noop;
#[cfg(target_os = "linux")]
pub mod posix;

pub use noop::NoopAdapter;
#[cfg(target_os = "linux")]
pub use posix::PosixAdapter;

bitflags! {
    /// What a platform adapter can change natively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Per-thread scheduling priority
        const THREAD_PRIORITY = 0b001;
        /// Per-thread CPU affinity
        const THREAD_AFFINITY = 0b010;
        /// Process CPU affinity
        const PROCESS_AFFINITY = 0b100;
    }
}

/// Identifies a running OS thread to the platform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeHandle {
    pthread: u64,
    tid: i64,
}

impl NativeHandle {
    /// The handle of the calling thread.
    #[cfg(target_os = "linux")]
    pub fn current() -> Self {
        // SAFETY: both calls only read the identity of the calling thread.
        unsafe {
            Self {
                pthread: libc::pthread_self() as u64,
                tid: libc::syscall(libc::SYS_gettid) as i64,
            }
        }
    }

    /// The handle of the calling thread.
    #[cfg(not(target_os = "linux"))]
    pub fn current() -> Self {
        Self::default()
    }

    /// The pthread identifier (0 where unavailable).
    pub fn pthread(&self) -> u64 {
        self.pthread
    }

    /// The kernel thread id (0 where unavailable).
    pub fn tid(&self) -> i64 {
        self.tid
    }
}

/// The boundary to the operating system's scheduler.
pub trait PlatformAdapter: Send + Sync + fmt::Debug {
    /// Short adapter name for diagnostics.
    fn name(&self) -> &'static str;

    /// What this adapter applies natively.
    fn capabilities(&self) -> Capabilities;

    /// Map `priority` (in `[0, 1]`) onto the native range and apply it.
    ///
    /// A permission-denied result from the native call is treated as success.
    fn set_thread_priority(&self, handle: NativeHandle, priority: f64) -> Result<(), PlatformError>;

    /// Restrict the thread to the given CPUs.
    fn set_thread_affinity(&self, handle: NativeHandle, cpus: &CpuSet) -> Result<(), PlatformError>;

    /// Every CPU visible to the process.
    fn system_affinity(&self) -> CpuSet;

    /// The CPUs the process may currently run on.
    fn process_affinity(&self) -> Result<CpuSet, PlatformError>;

    /// Restrict the process to the given CPUs, with no validation.
    fn set_process_affinity(&self, cpus: &CpuSet) -> Result<(), PlatformError>;
}

/// Pick the adapter for the configured backend.
pub fn detect(backend: PlatformBackend) -> Arc<dyn PlatformAdapter> {
    let adapter: Arc<dyn PlatformAdapter> = match backend {
        PlatformBackend::Noop => Arc::new(NoopAdapter::new()),
        PlatformBackend::Auto | PlatformBackend::Posix => native(backend),
    };
    debug!(
        "Using {} platform adapter ({:?})",
        adapter.name(),
        adapter.capabilities()
    );
    adapter
}

#[cfg(target_os = "linux")]
fn native(_backend: PlatformBackend) -> Arc<dyn PlatformAdapter> {
    Arc::new(PosixAdapter::new())
}

#[cfg(not(target_os = "linux"))]
fn native(backend: PlatformBackend) -> Arc<dyn PlatformAdapter> {
    if backend == PlatformBackend::Posix {
        warn!("POSIX platform adapter is only available on Linux, falling back to noop");
    }
    Arc::new(NoopAdapter::new())
}

/// Restrict the process to `cpus` after checking they are all visible.
///
/// Fails with `Error::Validation` if any CPU lies outside the adapter's
/// system affinity.
pub fn set_process_affinity_checked(
    adapter: &dyn PlatformAdapter,
    cpus: &CpuSet,
) -> strand_core::Result<()> {
    let system = adapter.system_affinity();
    if !cpus.is_subset(&system) {
        return Err(strand_core::Error::Validation(format!(
            "process affinity {} is not a subset of the system affinity {}",
            cpus, system
        )));
    }
    adapter.set_process_affinity(cpus).map_err(|e| {
        warn!("Failed to set process affinity to {}: {}", cpus, e);
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::Error;

    #[test]
    fn test_noop_backend_has_no_capabilities() {
        let adapter = detect(PlatformBackend::Noop);
        assert_eq!(adapter.name(), "noop");
        assert!(adapter.capabilities().is_empty());
        assert!(!adapter.system_affinity().is_empty());
    }

    #[test]
    fn test_checked_process_affinity_rejects_unknown_cpus() {
        let adapter = NoopAdapter::new();
        let cpus = CpuSet::from([100_000]);
        assert!(matches!(
            set_process_affinity_checked(&adapter, &cpus),
            Err(Error::Validation(_))
        ));

        let system = adapter.system_affinity();
        assert!(set_process_affinity_checked(&adapter, &system).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_auto_backend_is_native_on_linux() {
        let adapter = detect(PlatformBackend::Auto);
        assert_eq!(adapter.name(), "posix");
        assert!(adapter.capabilities().contains(Capabilities::THREAD_AFFINITY));
        assert_ne!(NativeHandle::current().tid(), 0);
    }
}
