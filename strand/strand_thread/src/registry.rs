//! Process-wide thread registry.
//!
//! The registry is created once, either explicitly through [`init`] or
//! lazily with default configuration on first use, and lives until the
//! process exits. It owns the platform adapter, the default group and the
//! table of running and adopted threads.

use dashmap::DashMap;
use log::{debug, info};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use strand_core::{CpuSet, Error, Result, StrandConfig};
use strand_sync::WaitStrategy;

use crate::group::ThreadGroup;
use crate::platform::{self, PlatformAdapter};
use crate::thread::ManagedThread;

static REGISTRY: OnceCell<Registry> = OnceCell::new();

/// Shared state for every managed thread in the process.
pub struct Registry {
    config: StrandConfig,
    platform: Arc<dyn PlatformAdapter>,
    default_group: Arc<ThreadGroup>,
    threads: DashMap<ThreadId, Arc<ManagedThread>>,
    next_name: AtomicUsize,
}

impl Registry {
    fn new(config: StrandConfig) -> Self {
        let platform = platform::detect(config.platform.backend);
        let default_group = ThreadGroup::new(config.threads.default_group_name.clone());
        info!(
            "Initialized strand registry ({} platform, default group '{}')",
            platform.name(),
            config.threads.default_group_name
        );

        Self {
            config,
            platform,
            default_group,
            threads: DashMap::new(),
            next_name: AtomicUsize::new(1),
        }
    }

    /// The configuration the registry was created with.
    pub fn config(&self) -> &StrandConfig {
        &self.config
    }

    /// The configured wait strategy, for locks created by the application.
    pub fn wait_strategy(&self) -> WaitStrategy {
        WaitStrategy::from(&self.config.sync)
    }

    /// The platform adapter shared by threads that do not specify one.
    pub fn platform(&self) -> Arc<dyn PlatformAdapter> {
        Arc::clone(&self.platform)
    }

    /// The group threads join when none is given.
    pub fn default_group(&self) -> Arc<ThreadGroup> {
        Arc::clone(&self.default_group)
    }

    pub(crate) fn next_thread_name(&self) -> String {
        let n = self.next_name.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.config.threads.name_prefix, n)
    }

    pub(crate) fn track(&self, ident: ThreadId, thread: &Arc<ManagedThread>) {
        self.threads.insert(ident, Arc::clone(thread));
    }

    pub(crate) fn forget(&self, ident: ThreadId) {
        self.threads.remove(&ident);
    }

    /// The managed thread running as `ident`, if strand knows about it.
    pub fn lookup(&self, ident: ThreadId) -> Option<Arc<ManagedThread>> {
        self.threads.get(&ident).map(|entry| Arc::clone(entry.value()))
    }

    /// The managed counterpart of the calling thread, created on first request.
    pub(crate) fn adopt_current(&self) -> Arc<ManagedThread> {
        let thread = thread::current();
        let entry = self.threads.entry(thread.id()).or_insert_with(|| {
            let name = thread
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| self.next_thread_name());
            debug!("Adopting thread '{}'", name);
            Arc::new(ManagedThread::adopted(&thread, name, self.platform()))
        });
        let managed = Arc::clone(entry.value());
        drop(entry);

        if !managed.has_group() {
            let _ = managed.set_group(&self.default_group);
        }
        managed
    }

    /// Live managed threads, including adopted ones.
    pub fn enumerate(&self) -> Vec<Arc<ManagedThread>> {
        self.threads
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|thread| thread.is_alive())
            .collect()
    }

    /// Number of live managed threads.
    pub fn active_count(&self) -> usize {
        self.enumerate().len()
    }

    /// Join every live non-daemon thread other than the caller.
    ///
    /// All joins share one deadline. Returns `false` if it passes first.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let me = thread::current().id();
        let pending: Vec<_> = self
            .enumerate()
            .into_iter()
            .filter(|thread| !thread.is_daemon() && thread.ident() != Some(me))
            .collect();
        info!("Shutting down, waiting for {} thread(s)", pending.len());

        for thread in pending {
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(deadline - now)
                }
            };
            if !thread.join(remaining)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Create the process-wide registry from `config`.
///
/// This also sets the `log` crate's maximum level to `config.log_level`.
///
/// Fails with `Error::State` if the registry already exists, including when
/// it was created implicitly by an earlier call into strand.
pub fn init(config: StrandConfig) -> Result<&'static Registry> {
    config.validate()?;
    let mut created = false;
    let registry = REGISTRY.get_or_init(|| {
        created = true;
        log::set_max_level(config.log_level.into());
        Registry::new(config)
    });
    if !created {
        return Err(Error::State("strand is already initialized".to_string()));
    }
    Ok(registry)
}

/// The process-wide registry, created with default settings if needed.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry::new(StrandConfig::default()))
}

/// Live managed threads, including adopted ones.
pub fn enumerate() -> Vec<Arc<ManagedThread>> {
    registry().enumerate()
}

/// Number of live managed threads.
pub fn active_count() -> usize {
    registry().active_count()
}

/// Join every live non-daemon thread other than the caller.
pub fn shutdown(timeout: Option<Duration>) -> Result<bool> {
    registry().shutdown(timeout)
}

/// Every CPU visible to the process.
pub fn system_affinity() -> CpuSet {
    registry().platform.system_affinity()
}

/// The CPUs the process may currently run on.
pub fn process_affinity() -> Result<CpuSet> {
    Ok(registry().platform.process_affinity()?)
}

/// Restrict the process to `cpus`.
///
/// Fails with `Error::Validation` if any CPU is outside [`system_affinity`].
pub fn set_process_affinity(cpus: impl Into<CpuSet>) -> Result<()> {
    platform::set_process_affinity_checked(registry().platform.as_ref(), &cpus.into())
}
