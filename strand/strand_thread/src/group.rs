//! Thread groups.
//!
//! A group tracks its members weakly and applies priority and affinity to
//! all of them as one operation: if any member fails, every member changed
//! so far is restored to its previous value and the original error is
//! returned. Batch operations on one group are serialized.

use log::{debug, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use strand_core::{CpuSet, GroupId, Result};

use crate::thread::{check_priority, ManagedThread};

#[derive(Debug, Default)]
struct GroupState {
    members: Vec<Weak<ManagedThread>>,
    priority: Option<f64>,
    affinity: Option<CpuSet>,
}

impl GroupState {
    fn live_members(&self) -> Vec<Arc<ManagedThread>> {
        self.members.iter().filter_map(Weak::upgrade).collect()
    }
}

/// A named collection of managed threads.
pub struct ThreadGroup {
    id: GroupId,
    name: Option<String>,
    state: Mutex<GroupState>,
}

impl ThreadGroup {
    /// Create a named group.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: GroupId::new(),
            name: Some(name.into()),
            state: Mutex::new(GroupState::default()),
        })
    }

    /// Create a group without a name.
    pub fn unnamed() -> Arc<Self> {
        Arc::new(Self {
            id: GroupId::new(),
            name: None,
            state: Mutex::new(GroupState::default()),
        })
    }

    /// Unique identity of this group.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Get the name of this group
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn add(&self, thread: &Arc<ManagedThread>) {
        let mut state = self.state.lock();
        state.members.retain(|member| member.strong_count() > 0);
        state.members.push(Arc::downgrade(thread));
    }

    /// Members that are still referenced somewhere.
    pub fn members(&self) -> Vec<Arc<ManagedThread>> {
        self.state.lock().live_members()
    }

    /// Number of members still referenced somewhere.
    pub fn len(&self) -> usize {
        self.members().len()
    }

    /// Whether the group has no referenced members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The priority last applied to the whole group.
    pub fn priority(&self) -> Option<f64> {
        self.state.lock().priority
    }

    /// Set every member's priority, all or nothing.
    ///
    /// On failure each member already changed gets its previous priority
    /// back and the group's recorded priority is left unchanged.
    pub fn set_priority(&self, priority: f64) -> Result<()> {
        check_priority(priority)?;
        let mut state = self.state.lock();
        let members = state.live_members();

        let mut changed = Vec::with_capacity(members.len());
        for thread in &members {
            changed.push((thread, thread.priority()));
            if let Err(e) = thread.set_priority(priority) {
                for (thread, previous) in changed.into_iter().rev() {
                    if let Err(restore) = thread.restore_priority(previous) {
                        warn!(
                            "Failed to restore priority of '{}' in {}: {}",
                            thread.name(),
                            self,
                            restore
                        );
                    }
                }
                return Err(e);
            }
        }

        state.priority = Some(priority);
        debug!("Set priority {} on {} ({} members)", priority, self, members.len());
        Ok(())
    }

    /// The affinity last applied to the whole group.
    pub fn affinity(&self) -> Option<CpuSet> {
        self.state.lock().affinity.clone()
    }

    /// Set every member's affinity, all or nothing.
    pub fn set_affinity(&self, affinity: impl Into<CpuSet>) -> Result<()> {
        let affinity = affinity.into();
        let mut state = self.state.lock();
        let members = state.live_members();

        let mut changed = Vec::with_capacity(members.len());
        for thread in &members {
            changed.push((thread, thread.affinity()));
            if let Err(e) = thread.set_affinity(affinity.clone()) {
                for (thread, previous) in changed.into_iter().rev() {
                    if let Err(restore) = thread.restore_affinity(previous) {
                        warn!(
                            "Failed to restore affinity of '{}' in {}: {}",
                            thread.name(),
                            self,
                            restore
                        );
                    }
                }
                return Err(e);
            }
        }

        debug!("Set affinity {} on {} ({} members)", affinity, self, members.len());
        state.affinity = Some(affinity);
        Ok(())
    }

    /// Whether any member is alive.
    pub fn is_alive(&self) -> bool {
        self.members().iter().any(|thread| thread.is_alive())
    }

    /// Join every started member, sharing one deadline.
    ///
    /// Returns `false` as soon as the deadline passes or a member is still
    /// alive after its share of the wait. Members never started, and the
    /// calling thread itself, are skipped.
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let me = thread::current().id();
        for thread in self.members() {
            if !thread.is_started() || thread.ident() == Some(me) {
                continue;
            }
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

impl fmt::Display for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<ThreadGroup '{}'>", name),
            None => write!(f, "<ThreadGroup {}>", self.id),
        }
    }
}

impl fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("members", &self.len())
            .finish()
    }
}
