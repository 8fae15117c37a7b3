//! Managed threads.
//!
//! A `ManagedThread` wraps a std thread with a scheduling priority, a CPU
//! affinity, membership in exactly one `ThreadGroup` and lifecycle hooks.
//! Priority and affinity are recorded on the thread and applied through the
//! platform adapter just before the body runs, and again whenever they are
//! changed while the thread is alive.

use log::{debug, error, warn};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread, ThreadId};
use std::time::{Duration, Instant};

use strand_core::{CpuSet, Error, Result, ThreadUid};

use crate::group::ThreadGroup;
use crate::platform::{NativeHandle, PlatformAdapter};
use crate::registry::registry;

const NEW: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;

/// The thread body.
pub(crate) type Target = Box<dyn FnOnce() + Send + 'static>;

/// Extension points around a managed thread's body.
///
/// Both hooks run on the managed thread itself. `after_run` runs even when
/// the body panics.
pub trait ThreadHooks: Send + Sync {
    /// Called after priority and affinity are applied, before the body.
    fn before_run(&self, _thread: &ManagedThread) {}

    /// Called after the body returns or panics.
    fn after_run(&self, _thread: &ManagedThread) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ThreadHooks for NoHooks {}

#[derive(Debug, Default)]
struct Settings {
    priority: Option<f64>,
    affinity: Option<CpuSet>,
}

/// The calling thread's managed identity.
struct Current {
    thread: Arc<ManagedThread>,
    adopted: bool,
}

impl Drop for Current {
    fn drop(&mut self) {
        if self.adopted {
            self.thread.mark_finished();
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

/// A thread with priority, affinity, group membership and lifecycle hooks.
pub struct ManagedThread {
    uid: ThreadUid,
    name: String,
    daemon: bool,
    group: OnceCell<Arc<ThreadGroup>>,

    /// Held while recording and applying, and while the thread finishes
    settings: Mutex<Settings>,

    state: AtomicU8,
    started: AtomicBool,
    panicked: AtomicBool,
    ident: OnceCell<ThreadId>,
    handle: OnceCell<NativeHandle>,
    finished: Mutex<bool>,
    finished_changed: Condvar,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    target: Mutex<Option<Target>>,
    hooks: Arc<dyn ThreadHooks>,
    platform: Arc<dyn PlatformAdapter>,
}

impl ManagedThread {
    pub(crate) fn new(
        name: String,
        daemon: bool,
        priority: Option<f64>,
        affinity: Option<CpuSet>,
        target: Target,
        hooks: Arc<dyn ThreadHooks>,
        platform: Arc<dyn PlatformAdapter>,
    ) -> Self {
        Self {
            uid: ThreadUid::new(),
            name,
            daemon,
            group: OnceCell::new(),
            settings: Mutex::new(Settings { priority, affinity }),
            state: AtomicU8::new(NEW),
            started: AtomicBool::new(false),
            panicked: AtomicBool::new(false),
            ident: OnceCell::new(),
            handle: OnceCell::new(),
            finished: Mutex::new(false),
            finished_changed: Condvar::new(),
            join_handle: Mutex::new(None),
            target: Mutex::new(Some(target)),
            hooks,
            platform,
        }
    }

    /// Wrap a thread that was not started through strand.
    pub(crate) fn adopted(thread: &Thread, name: String, platform: Arc<dyn PlatformAdapter>) -> Self {
        let adopted = Self::new(
            name,
            true,
            None,
            None,
            Box::new(|| {}),
            Arc::new(NoHooks),
            platform,
        );
        adopted.target.lock().take();
        adopted.started.store(true, Ordering::SeqCst);
        adopted.state.store(RUNNING, Ordering::SeqCst);
        let _ = adopted.ident.set(thread.id());
        adopted
    }

    /// Spawn `target` on a new managed thread with default settings.
    pub fn spawn<F>(target: F) -> Result<Arc<ManagedThread>>
    where
        F: FnOnce() + Send + 'static,
    {
        crate::builder::ThreadBuilder::new().spawn(target)
    }

    /// The managed counterpart of an existing std thread.
    ///
    /// Threads started through strand map to themselves, and repeated calls
    /// return the same instance. A thread not started through strand can
    /// only be adopted by itself, since its exit is observed from its own
    /// thread-local storage; it then joins the default group as a daemon.
    /// Asking for another thread that was never adopted fails with
    /// `Error::State`.
    pub fn from_existing(thread: &Thread) -> Result<Arc<ManagedThread>> {
        if thread.id() == thread::current().id() {
            return Ok(current());
        }
        registry().lookup(thread.id()).ok_or_else(|| {
            Error::State(format!(
                "thread {} was not started through strand and can only adopt itself",
                thread.name().unwrap_or("<unnamed>")
            ))
        })
    }

    /// Stable identity, unique for the life of the process.
    pub fn uid(&self) -> ThreadUid {
        self.uid
    }

    /// The std thread id, once the thread is running.
    pub fn ident(&self) -> Option<ThreadId> {
        self.ident.get().copied()
    }

    /// The native handle, once the thread is running.
    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.handle.get().copied()
    }

    /// Get the name of this thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Daemon threads are not waited for by [`shutdown`](crate::shutdown).
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// The group this thread belongs to.
    pub fn group(&self) -> Arc<ThreadGroup> {
        match self.group.get() {
            Some(group) => Arc::clone(group),
            None => registry().default_group(),
        }
    }

    pub(crate) fn has_group(&self) -> bool {
        self.group.get().is_some()
    }

    /// Bind the thread to `group`.
    ///
    /// Every thread is bound when it is built, so this fails with
    /// `Error::State` for any thread obtained through the public API.
    pub fn set_group(self: &Arc<Self>, group: &Arc<ThreadGroup>) -> Result<()> {
        if self.group.set(Arc::clone(group)).is_err() {
            return Err(Error::State(format!(
                "thread '{}' already belongs to {}",
                self.name,
                self.group()
            )));
        }
        group.add(self);
        Ok(())
    }

    /// The recorded priority.
    pub fn priority(&self) -> Option<f64> {
        self.settings.lock().priority
    }

    /// Record a priority in `[0, 1]` and apply it if the thread is running.
    ///
    /// Fails with `Error::Range` outside `[0, 1]`, leaving the record alone.
    /// A platform failure is returned after the value has been recorded.
    pub fn set_priority(&self, priority: f64) -> Result<()> {
        check_priority(priority)?;
        let mut settings = self.settings.lock();
        settings.priority = Some(priority);
        if let Some(handle) = self.live_handle() {
            self.platform.set_thread_priority(handle, priority)?;
        }
        Ok(())
    }

    /// Forget the recorded priority. The native priority is left as it is.
    pub fn clear_priority(&self) {
        self.settings.lock().priority = None;
    }

    /// The recorded affinity.
    pub fn affinity(&self) -> Option<CpuSet> {
        self.settings.lock().affinity.clone()
    }

    /// Record a CPU affinity and apply it if the thread is running.
    ///
    /// A platform failure is returned after the value has been recorded.
    pub fn set_affinity(&self, affinity: impl Into<CpuSet>) -> Result<()> {
        let affinity = affinity.into();
        let mut settings = self.settings.lock();
        if let Some(handle) = self.live_handle() {
            let applied = self.platform.set_thread_affinity(handle, &affinity);
            settings.affinity = Some(affinity);
            return applied.map_err(Error::from);
        }
        settings.affinity = Some(affinity);
        Ok(())
    }

    /// Forget the recorded affinity. The native affinity is left as it is.
    pub fn clear_affinity(&self) {
        self.settings.lock().affinity = None;
    }

    pub(crate) fn restore_priority(&self, previous: Option<f64>) -> Result<()> {
        match previous {
            Some(priority) => self.set_priority(priority),
            None => {
                self.clear_priority();
                Ok(())
            }
        }
    }

    pub(crate) fn restore_affinity(&self, previous: Option<CpuSet>) -> Result<()> {
        match previous {
            Some(affinity) => self.set_affinity(affinity),
            None => {
                self.clear_affinity();
                Ok(())
            }
        }
    }

    /// Whether the thread has been started and has not finished.
    pub fn is_alive(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Whether `start` has been called (always true for adopted threads).
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether the body panicked.
    pub fn is_panicked(&self) -> bool {
        self.panicked.load(Ordering::SeqCst)
    }

    /// Start the thread. Fails with `Error::State` if it was already started.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::State(format!(
                "thread '{}' can only be started once",
                self.name
            )));
        }
        let target = self.target.lock().take().ok_or_else(|| {
            Error::State(format!("thread '{}' has no body to run", self.name))
        })?;

        self.state.store(RUNNING, Ordering::SeqCst);
        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || this.run(target));

        match spawned {
            Ok(handle) => {
                let _ = self.ident.set(handle.thread().id());
                self.track();
                *self.join_handle.lock() = Some(handle);
                debug!("Started thread '{}'", self.name);
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn thread '{}': {}", self.name, e);
                self.mark_finished();
                Err(e.into())
            }
        }
    }

    /// Wait for the thread to finish, at most `timeout` if given.
    ///
    /// Returns whether the thread has finished. Fails with `Error::State`
    /// for a thread that was never started or when a thread joins itself.
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        if !self.is_started() {
            return Err(Error::State(format!(
                "cannot join thread '{}' before it is started",
                self.name
            )));
        }
        if self.ident() == Some(thread::current().id()) {
            return Err(Error::State(format!(
                "thread '{}' cannot join itself",
                self.name
            )));
        }

        if !self.wait_finished(timeout) {
            return Ok(false);
        }
        if let Some(handle) = self.join_handle.lock().take() {
            // The body's panics were already caught; this only reaps the OS thread.
            let _ = handle.join();
        }
        Ok(true)
    }

    fn live_handle(&self) -> Option<NativeHandle> {
        if self.is_alive() {
            self.native_handle()
        } else {
            None
        }
    }

    fn run(self: Arc<Self>, target: Target) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.before_run();
            target();
        }));
        if let Err(payload) = outcome {
            self.panicked.store(true, Ordering::SeqCst);
            error!(
                "Thread '{}' panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            );
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.hooks.after_run(&self))) {
            error!(
                "after_run hook of thread '{}' panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            );
        }

        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
        self.mark_finished();
        debug!("Thread '{}' finished", self.name);
    }

    fn before_run(self: &Arc<Self>) {
        let _ = self.ident.set(thread::current().id());
        install_current(self, false);
        self.track();

        {
            let settings = self.settings.lock();
            let handle = *self.handle.get_or_init(NativeHandle::current);
            if let Some(priority) = settings.priority {
                if let Err(e) = self.platform.set_thread_priority(handle, priority) {
                    warn!("Failed to apply priority {} to '{}': {}", priority, self.name, e);
                }
            }
            if let Some(affinity) = &settings.affinity {
                if let Err(e) = self.platform.set_thread_affinity(handle, affinity) {
                    warn!("Failed to apply affinity {} to '{}': {}", affinity, self.name, e);
                }
            }
        }

        debug!("Thread '{}' running", self.name);
        self.hooks.before_run(self);
    }

    /// Enter the thread in the registry unless it has already finished.
    ///
    /// Both `start` and the thread itself call this, whichever comes first
    /// wins. The state check and the insert happen under the settings lock,
    /// as do `mark_finished`'s state change and removal, so a finished
    /// thread is never left behind in the registry.
    fn track(self: &Arc<Self>) {
        let _settings = self.settings.lock();
        if let Some(ident) = self.ident() {
            if self.state.load(Ordering::SeqCst) != FINISHED {
                registry().track(ident, self);
            }
        }
    }

    /// Also runs from the adopted thread's TLS destructor, so it must not
    /// log or use anything that needs `thread::current()`.
    fn mark_finished(&self) {
        {
            let _settings = self.settings.lock();
            self.state.store(FINISHED, Ordering::SeqCst);
            if let Some(ident) = self.ident() {
                registry().forget(ident);
            }
        }
        *self.finished.lock() = true;
        self.finished_changed.notify_all();
    }

    fn wait_finished(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut finished = self.finished.lock();
        while !*finished {
            match deadline {
                None => self.finished_changed.wait(&mut finished),
                Some(deadline) => {
                    if self
                        .finished_changed
                        .wait_until(&mut finished, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
        }
        *finished
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("daemon", &self.daemon)
            .field("alive", &self.is_alive())
            .field("platform", &self.platform.name())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.state.load(Ordering::SeqCst) {
            NEW => "initial",
            RUNNING => "started",
            _ => "stopped",
        };
        write!(f, "<ManagedThread '{}' {}>", self.name, status)
    }
}

/// The managed thread for the calling thread, adopting it if necessary.
pub fn current() -> Arc<ManagedThread> {
    let installed = CURRENT
        .try_with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|current| Arc::clone(&current.thread))
        })
        .ok()
        .flatten();
    match installed {
        Some(thread) => thread,
        None => adopt_current(),
    }
}

fn adopt_current() -> Arc<ManagedThread> {
    let managed = registry().adopt_current();
    let _ = managed.handle.set(NativeHandle::current());
    install_current(&managed, true);
    managed
}

fn install_current(thread: &Arc<ManagedThread>, adopted: bool) {
    let _ = CURRENT.try_with(|current| {
        let mut current = current.borrow_mut();
        if current.is_none() {
            *current = Some(Current {
                thread: Arc::clone(thread),
                adopted,
            });
        }
    });
}

pub(crate) fn check_priority(priority: f64) -> Result<()> {
    if (0.0..=1.0).contains(&priority) {
        Ok(())
    } else {
        Err(Error::Range(format!(
            "priority must be within [0, 1], got {}",
            priority
        )))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<unknown panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ThreadBuilder;
    use crate::platform::NoopAdapter;
    use std::sync::atomic::AtomicUsize;
    use strand_sync::Event;

    struct CountingHooks {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl ThreadHooks for CountingHooks {
        fn before_run(&self, _thread: &ManagedThread) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_run(&self, _thread: &ManagedThread) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lifecycle() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let thread = ThreadBuilder::new()
            .name("lifecycle")
            .platform(Arc::new(NoopAdapter::new()))
            .build(move || flag.store(true, Ordering::SeqCst))
            .unwrap();

        assert!(!thread.is_alive());
        assert!(matches!(thread.join(None), Err(Error::State(_))));

        thread.start().unwrap();
        assert!(matches!(thread.start(), Err(Error::State(_))));
        assert!(thread.join(Some(Duration::from_secs(5))).unwrap());
        assert!(!thread.is_alive());
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(thread.to_string(), "<ManagedThread 'lifecycle' stopped>");
    }

    #[test]
    fn test_after_run_survives_panic() {
        let hooks = Arc::new(CountingHooks {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        let thread = ThreadBuilder::new()
            .hooks(Arc::clone(&hooks) as Arc<dyn ThreadHooks>)
            .platform(Arc::new(NoopAdapter::new()))
            .spawn(|| panic!("body failed"))
            .unwrap();

        assert!(thread.join(Some(Duration::from_secs(5))).unwrap());
        assert!(thread.is_panicked());
        assert_eq!(hooks.before.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_priority_range_is_checked() {
        let thread = ThreadBuilder::new().build(|| {}).unwrap();
        assert!(matches!(thread.set_priority(1.5), Err(Error::Range(_))));
        assert!(matches!(thread.set_priority(f64::NAN), Err(Error::Range(_))));
        assert_eq!(thread.priority(), None);

        thread.set_priority(0.25).unwrap();
        assert_eq!(thread.priority(), Some(0.25));
        thread.clear_priority();
        assert_eq!(thread.priority(), None);
    }

    #[test]
    fn test_settings_are_visible_while_running() {
        let release = Arc::new(Event::new());
        let gate = Arc::clone(&release);
        let thread = ThreadBuilder::new()
            .priority(0.5)
            .affinity([0])
            .platform(Arc::new(NoopAdapter::new()))
            .spawn(move || {
                gate.wait(Some(Duration::from_secs(5)));
            })
            .unwrap();

        assert!(thread.is_alive());
        assert_eq!(thread.priority(), Some(0.5));
        thread.set_affinity([0, 1]).unwrap();
        assert_eq!(thread.affinity(), Some(CpuSet::from([0, 1])));

        release.set();
        assert!(thread.join(Some(Duration::from_secs(5))).unwrap());
    }

    #[test]
    fn test_group_cannot_be_rebound() {
        let thread = ThreadBuilder::new().build(|| {}).unwrap();
        let other = ThreadGroup::new("other");
        assert!(matches!(thread.set_group(&other), Err(Error::State(_))));
        assert!(Arc::ptr_eq(&thread.group(), &registry().default_group()));
        assert!(other.is_empty());
    }

    #[test]
    fn test_current_inside_managed_thread() {
        let thread = ThreadBuilder::new()
            .name("introspective")
            .platform(Arc::new(NoopAdapter::new()))
            .spawn(|| {
                let me = current();
                assert_eq!(me.name(), "introspective");
                assert!(me.is_alive());
                assert!(matches!(me.join(None), Err(Error::State(_))));
            })
            .unwrap();
        assert!(thread.join(Some(Duration::from_secs(5))).unwrap());
        assert!(!thread.is_panicked());
    }

    #[test]
    fn test_from_existing_is_idempotent() {
        let handle = thread::spawn(|| {
            let first = current();
            let second = ManagedThread::from_existing(&thread::current()).unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            assert!(first.is_daemon());
            assert!(first.is_alive());
            assert!(Arc::ptr_eq(&first.group(), &registry().default_group()));
            first
        });
        let adopted = handle.join().unwrap();
        assert!(!adopted.is_alive());
        assert!(adopted.join(Some(Duration::from_millis(10))).unwrap());
        assert!(registry().lookup(adopted.ident().unwrap()).is_none());
    }

    #[test]
    fn test_foreign_thread_cannot_be_adopted_from_outside() {
        let release = Arc::new(Event::new());
        let native = {
            let release = Arc::clone(&release);
            thread::spawn(move || {
                release.wait(Some(Duration::from_secs(5)));
            })
        };
        let foreign = native.thread().clone();
        assert!(matches!(
            ManagedThread::from_existing(&foreign),
            Err(Error::State(_))
        ));
        assert!(registry().lookup(foreign.id()).is_none());

        release.set();
        native.join().unwrap();
        assert!(matches!(
            ManagedThread::from_existing(&foreign),
            Err(Error::State(_))
        ));
        assert!(registry().enumerate().iter().all(|t| t.ident() != Some(foreign.id())));
    }

    #[test]
    fn test_self_adopted_thread_is_visible_to_others() {
        let (tx, rx) = std::sync::mpsc::channel();
        let release = Arc::new(Event::new());
        let native = {
            let release = Arc::clone(&release);
            thread::spawn(move || {
                tx.send(current()).unwrap();
                release.wait(Some(Duration::from_secs(5)));
            })
        };
        let adopted = rx.recv().unwrap();
        let found = ManagedThread::from_existing(native.thread()).unwrap();
        assert!(Arc::ptr_eq(&adopted, &found));
        assert!(found.is_alive());

        release.set();
        native.join().unwrap();
        assert!(!found.is_alive());
    }

    #[test]
    fn test_started_thread_is_registered_before_spawn_returns() {
        let noop: Arc<dyn PlatformAdapter> = Arc::new(NoopAdapter::new());
        for _ in 0..20 {
            let release = Arc::new(Event::new());
            let (tx, rx) = std::sync::mpsc::channel();
            let spawned = {
                let release = Arc::clone(&release);
                ThreadBuilder::new()
                    .platform(Arc::clone(&noop))
                    .spawn(move || {
                        tx.send(thread::current()).unwrap();
                        release.wait(Some(Duration::from_secs(5)));
                    })
                    .unwrap()
            };
            let ident = spawned.ident().unwrap();
            let tracked = registry().lookup(ident).unwrap();
            assert!(Arc::ptr_eq(&tracked, &spawned));

            let native = rx.recv().unwrap();
            let found = ManagedThread::from_existing(&native).unwrap();
            assert!(Arc::ptr_eq(&found, &spawned));

            release.set();
            assert!(spawned.join(Some(Duration::from_secs(5))).unwrap());
            assert!(registry().lookup(ident).is_none());
        }
    }
}
