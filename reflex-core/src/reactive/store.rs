//! Subscription Store
//!
//! The store indexes subscriptions by what was read: for every observed
//! target and tracked key it keeps the set of reactions that read it.
//!
//! ```text
//! ObjectId ──▶ TargetEntry { owner: Weak<_>, deps: TrackKey ──▶ Dep }
//!                                                    Dep = {reaction, ...}
//! ```
//!
//! Reactions keep the reverse index (a weak pointer to every `Dep` they
//! joined) so that re-running a reaction can drop it from all of its old
//! sets without scanning the store.
//!
//! # Weak Keys
//!
//! Entries hold only a weak handle to their target, and entries whose target
//! has been dropped are swept the next time a new target is registered (or
//! on an explicit [`sweep`]).
//!
//! Subscription sets hold their reactions strongly, though, and a reaction
//! body usually captures the wrapper it reads. Such a target stays alive
//! until the reaction is disposed; [`ReactionRef::dispose`] is the way to
//! release a reaction, and sweeping only reclaims what disposal freed.
//!
//! [`sweep`]: SubscriptionStore::sweep

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::value::{Key, ObjectId};
use super::reaction::ReactionRef;

/// The set of reactions subscribed to one (target, key) pair.
pub(crate) type Dep = Arc<Mutex<IndexSet<ReactionRef>>>;

/// Non-owning pointer to a [`Dep`], held by the reaction that joined it.
pub(crate) type WeakDep = Weak<Mutex<IndexSet<ReactionRef>>>;

/// What a reaction read from a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// An ordinary property.
    Property(Key),

    /// The target's own key set. Read by enumeration, invalidated only by
    /// additions and deletions.
    Iterate,

    /// The value of a derived cell.
    DerivedValue,
}

impl From<Key> for TrackKey {
    fn from(key: Key) -> Self {
        TrackKey::Property(key)
    }
}

impl From<&str> for TrackKey {
    fn from(key: &str) -> Self {
        TrackKey::Property(Key::from(key))
    }
}

/// The kind of mutation carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// An existing own key received a new value.
    Set,
    /// A key became an own key.
    Add,
    /// An own key was removed.
    Delete,
}

impl ChangeKind {
    /// Whether this change alters the target's key set.
    pub fn affects_keys(&self) -> bool {
        matches!(self, ChangeKind::Add | ChangeKind::Delete)
    }
}

struct TargetEntry {
    /// The observed target. Once it is gone nothing can trigger this entry.
    owner: Weak<dyn Any + Send + Sync>,

    deps: HashMap<TrackKey, Dep>,
}

/// Weak-keyed, two-level map from (target, key) to subscribed reactions.
#[derive(Default)]
pub struct SubscriptionStore {
    targets: DashMap<ObjectId, TargetEntry>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the subscription set for `(target, key)`, creating it if needed.
    ///
    /// Only tracking creates entries; notification never does.
    pub(crate) fn dep_for<F>(&self, target: ObjectId, owner: F, key: TrackKey) -> Dep
    where
        F: FnOnce() -> Weak<dyn Any + Send + Sync>,
    {
        if !self.targets.contains_key(&target) {
            self.sweep();
        }

        let mut entry = self.targets.entry(target).or_insert_with(|| TargetEntry {
            owner: owner(),
            deps: HashMap::new(),
        });
        Arc::clone(entry.deps.entry(key).or_default())
    }

    /// Snapshot the reactions subscribed to `(target, key)`.
    ///
    /// Returns an owned list so callers can run reactions (which mutate the
    /// very sets being read) without holding any store lock.
    pub(crate) fn subscribers(&self, target: ObjectId, key: &TrackKey) -> Vec<ReactionRef> {
        let dep = match self.targets.get(&target) {
            Some(entry) => match entry.deps.get(key) {
                Some(dep) => Arc::clone(dep),
                None => return Vec::new(),
            },
            None => return Vec::new(),
        };
        let reactions = dep.lock().iter().cloned().collect();
        reactions
    }

    /// Number of reactions subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: ObjectId, key: &TrackKey) -> usize {
        self.targets
            .get(&target)
            .and_then(|entry| entry.deps.get(key).map(|dep| dep.lock().len()))
            .unwrap_or(0)
    }

    /// Number of targets that currently have an entry.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Drop entries whose target is gone, and empty subscription sets.
    ///
    /// Returns the number of targets removed.
    pub fn sweep(&self) -> usize {
        let before = self.targets.len();
        self.targets.retain(|_, entry| {
            if entry.owner.strong_count() == 0 {
                return false;
            }
            entry.deps.retain(|_, dep| !dep.lock().is_empty());
            true
        });
        let removed = before.saturating_sub(self.targets.len());
        if removed > 0 {
            tracing::debug!(removed, "swept dead subscription targets");
        }
        removed
    }
}

impl std::fmt::Debug for SubscriptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStore")
            .field("targets", &self.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;

    #[test]
    fn dep_for_returns_shared_set() {
        let store = SubscriptionStore::new();
        let object = Object::new();

        let a = store.dep_for(object.id(), || object.downgrade(), TrackKey::from("x"));
        let b = store.dep_for(object.id(), || object.downgrade(), TrackKey::from("x"));
        let c = store.dep_for(object.id(), || object.downgrade(), TrackKey::Iterate);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(store.target_count(), 1);
    }

    #[test]
    fn lookups_never_create_entries() {
        let store = SubscriptionStore::new();
        let object = Object::new();

        assert!(store.subscribers(object.id(), &TrackKey::from("x")).is_empty());
        assert_eq!(store.subscriber_count(object.id(), &TrackKey::Iterate), 0);
        assert_eq!(store.target_count(), 0);
    }

    #[test]
    fn sweep_drops_dead_targets() {
        let store = SubscriptionStore::new();
        let kept = Object::new();

        {
            let dropped = Object::new();
            store.dep_for(dropped.id(), || dropped.downgrade(), TrackKey::from("x"));
        }
        store.dep_for(kept.id(), || kept.downgrade(), TrackKey::from("x"));

        // Registering `kept` swept the dead entry already.
        assert_eq!(store.target_count(), 1);
        assert_eq!(store.sweep(), 0);

        drop(kept);
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.target_count(), 0);
    }

    #[test]
    fn change_kinds_that_affect_keys() {
        assert!(ChangeKind::Add.affects_keys());
        assert!(ChangeKind::Delete.affects_keys());
        assert!(!ChangeKind::Set.affects_keys());
    }
}
