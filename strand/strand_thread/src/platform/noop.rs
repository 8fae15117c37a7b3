//! Adapter that records nothing natively.

use strand_core::{CpuSet, PlatformError};

use super::{Capabilities, NativeHandle, PlatformAdapter};

/// Accepts every request without touching the scheduler.
///
/// Used where no native adapter exists, or when configured explicitly.
/// Priorities and affinities set on managed threads are still recorded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdapter;

impl NoopAdapter {
    /// Create a no-op adapter.
    pub fn new() -> Self {
        Self
    }
}

impl PlatformAdapter for NoopAdapter {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    fn set_thread_priority(&self, _handle: NativeHandle, _priority: f64) -> Result<(), PlatformError> {
        Ok(())
    }

    fn set_thread_affinity(&self, _handle: NativeHandle, _cpus: &CpuSet) -> Result<(), PlatformError> {
        Ok(())
    }

    fn system_affinity(&self) -> CpuSet {
        (0..num_cpus::get()).collect()
    }

    fn process_affinity(&self) -> Result<CpuSet, PlatformError> {
        Ok(self.system_affinity())
    }

    fn set_process_affinity(&self, _cpus: &CpuSet) -> Result<(), PlatformError> {
        Ok(())
    }
}
