//! Storage shared by the threads of a group.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strand_core::{Error, GroupId, Result};

use crate::thread::current;

type Attributes<V> = Arc<Mutex<HashMap<String, V>>>;

/// Like thread-local storage, but keyed by thread group.
///
/// The unqualified operations resolve the calling thread's group; the
/// `*_in` variants take a group explicitly. Each group's attributes sit
/// behind their own lock, created on first write.
pub struct GroupLocal<V> {
    groups: DashMap<GroupId, Attributes<V>>,
}

impl<V: Clone> GroupLocal<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Read an attribute of the calling thread's group.
    pub fn get(&self, name: &str) -> Result<V> {
        self.get_in(current_group(), name)
    }

    /// Write an attribute of the calling thread's group.
    pub fn set(&self, name: impl Into<String>, value: V) {
        self.set_in(current_group(), name, value)
    }

    /// Remove an attribute of the calling thread's group, returning its value.
    pub fn delete(&self, name: &str) -> Result<V> {
        self.delete_in(current_group(), name)
    }

    /// Whether the calling thread's group has the attribute.
    pub fn contains(&self, name: &str) -> bool {
        self.contains_in(current_group(), name)
    }

    /// Read an attribute of `group`.
    pub fn get_in(&self, group: GroupId, name: &str) -> Result<V> {
        self.existing(group)
            .and_then(|attributes| attributes.lock().get(name).cloned())
            .ok_or_else(|| not_found(group, name))
    }

    /// Write an attribute of `group`.
    pub fn set_in(&self, group: GroupId, name: impl Into<String>, value: V) {
        let attributes = Arc::clone(self.groups.entry(group).or_default().value());
        attributes.lock().insert(name.into(), value);
    }

    /// Remove an attribute of `group`, returning its value.
    pub fn delete_in(&self, group: GroupId, name: &str) -> Result<V> {
        self.existing(group)
            .and_then(|attributes| attributes.lock().remove(name))
            .ok_or_else(|| not_found(group, name))
    }

    /// Whether `group` has the attribute.
    pub fn contains_in(&self, group: GroupId, name: &str) -> bool {
        self.existing(group)
            .is_some_and(|attributes| attributes.lock().contains_key(name))
    }

    fn existing(&self, group: GroupId) -> Option<Attributes<V>> {
        self.groups.get(&group).map(|entry| Arc::clone(entry.value()))
    }
}

impl<V: Clone> Default for GroupLocal<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for GroupLocal<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupLocal")
            .field("groups", &self.groups.len())
            .finish()
    }
}

fn current_group() -> GroupId {
    current().group().id()
}

fn not_found(group: GroupId, name: &str) -> Error {
    Error::AttributeNotFound(format!("'{}' is not set for group {}", name, group))
}
