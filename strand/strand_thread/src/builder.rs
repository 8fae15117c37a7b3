//! Thread configuration.

use std::sync::Arc;

use strand_core::{CpuSet, Result};

use crate::group::ThreadGroup;
use crate::platform::PlatformAdapter;
use crate::registry::registry;
use crate::thread::{check_priority, ManagedThread, NoHooks, ThreadHooks};

/// Configures a [`ManagedThread`] before it is built.
///
/// Unset fields fall back to the registry: the default group, a generated
/// name and the detected platform adapter.
#[derive(Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    group: Option<Arc<ThreadGroup>>,
    daemon: bool,
    priority: Option<f64>,
    affinity: Option<CpuSet>,
    hooks: Option<Arc<dyn ThreadHooks>>,
    platform: Option<Arc<dyn PlatformAdapter>>,
}

impl ThreadBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the thread.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Place the thread in `group` instead of the default group.
    pub fn group(mut self, group: &Arc<ThreadGroup>) -> Self {
        self.group = Some(Arc::clone(group));
        self
    }

    /// Mark the thread as a daemon.
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Initial priority, checked when the thread is built.
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Initial CPU affinity.
    pub fn affinity(mut self, affinity: impl Into<CpuSet>) -> Self {
        self.affinity = Some(affinity.into());
        self
    }

    /// Lifecycle hooks.
    pub fn hooks(mut self, hooks: Arc<dyn ThreadHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Use a specific platform adapter for this thread.
    pub fn platform(mut self, platform: Arc<dyn PlatformAdapter>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Build the thread without starting it.
    ///
    /// Fails with `Error::Range` if the initial priority is outside `[0, 1]`.
    pub fn build<F>(self, target: F) -> Result<Arc<ManagedThread>>
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(priority) = self.priority {
            check_priority(priority)?;
        }

        let registry = registry();
        let thread = Arc::new(ManagedThread::new(
            self.name.unwrap_or_else(|| registry.next_thread_name()),
            self.daemon,
            self.priority,
            self.affinity,
            Box::new(target),
            self.hooks.unwrap_or_else(|| Arc::new(NoHooks)),
            self.platform.unwrap_or_else(|| registry.platform()),
        ));

        let group = self.group.unwrap_or_else(|| registry.default_group());
        thread.set_group(&group)?;
        Ok(thread)
    }

    /// Build the thread and start it.
    pub fn spawn<F>(self, target: F) -> Result<Arc<ManagedThread>>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = self.build(target)?;
        thread.start()?;
        Ok(thread)
    }
}
