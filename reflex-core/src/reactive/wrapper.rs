//! Intercepting State Wrapper
//!
//! A [`Reactive`] is a view of a plain [`Object`] through which every access
//! is observed:
//!
//! | operation        | effect                                            |
//! |------------------|---------------------------------------------------|
//! | `get(key)`       | tracks `key`                                      |
//! | `has(key)`       | tracks `key`                                      |
//! | `own_keys()`     | tracks the key set                                |
//! | `set(key, v)`    | triggers `Add` or `Set` if the value changed      |
//! | `delete(key)`    | triggers `Delete` if an own key was removed       |
//!
//! # Modes
//!
//! Deep wrappers hand out nested objects wrapped in the same mode, so a
//! read-only tree stays read-only all the way down. Shallow wrappers return
//! nested objects as plain values. Read-only wrappers reject writes: the
//! storage is left untouched and a diagnostic is reported, but the call
//! itself returns normally.
//!
//! # Prototypes
//!
//! An object may inherit from another wrapped object. Reads of keys the
//! object does not own fall through to the prototype (which tracks its own
//! key as well). An assignment to an inherited key creates an own key on the
//! object that received the assignment, and only that object notifies, so
//! a reaction that read the key through both objects runs once.

use std::fmt;
use std::sync::Weak;

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};
use crate::value::{Key, Object, ObjectId, Value};
use super::runtime::RuntimeInner;
use super::store::{ChangeKind, TrackKey};

/// How a wrapper treats nested objects and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Deep and mutable.
    Reactive,
    /// Mutable; nested objects are returned unwrapped.
    ShallowReactive,
    /// Deep and read-only.
    Readonly,
    /// Read-only; nested objects are returned unwrapped.
    ShallowReadonly,
}

impl Mode {
    pub fn is_shallow(&self) -> bool {
        matches!(self, Mode::ShallowReactive | Mode::ShallowReadonly)
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self, Mode::Readonly | Mode::ShallowReadonly)
    }
}

/// Result of reading a property through a wrapper.
#[derive(Debug, Clone)]
pub enum Field {
    /// A primitive, or a nested object read through a shallow wrapper.
    Plain(Value),
    /// A nested object, wrapped in the reader's mode.
    Wrapped(Reactive),
}

impl Field {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Plain(v) => v.as_f64(),
            Field::Wrapped(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Plain(v) => v.as_bool(),
            Field::Wrapped(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Plain(v) => v.as_str(),
            Field::Wrapped(_) => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Field::Wrapped(r) => Some(r),
            Field::Plain(_) => None,
        }
    }

    /// The underlying value, unwrapping nested wrappers.
    pub fn into_value(self) -> Value {
        match self {
            Field::Plain(v) => v,
            Field::Wrapped(r) => Value::Object(r.target),
        }
    }
}

/// Observed view of an [`Object`].
///
/// Two wrappers are equal when they view the same object in the same mode.
#[derive(Clone)]
pub struct Reactive {
    target: Object,
    mode: Mode,
    runtime: Weak<RuntimeInner>,
}

impl Reactive {
    pub(crate) fn new(target: Object, mode: Mode, runtime: Weak<RuntimeInner>) -> Self {
        Self {
            target,
            mode,
            runtime,
        }
    }

    /// The unwrapped object. Accesses through it are not observed.
    pub fn raw(&self) -> &Object {
        &self.target
    }

    pub fn id(&self) -> ObjectId {
        self.target.id()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a property, own or inherited.
    pub fn get(&self, key: &str) -> Option<Field> {
        let key = Key::from(key);
        self.read(&key, true)
    }

    /// Read a property without tracking it.
    pub fn get_untracked(&self, key: &str) -> Option<Field> {
        let key = Key::from(key);
        self.read(&key, false)
    }

    /// Check whether a property exists, own or inherited.
    pub fn has(&self, key: &str) -> bool {
        let key = Key::from(key);
        self.track(TrackKey::Property(key.clone()));
        if self.target.contains_key(key.as_str()) {
            return true;
        }
        self.target
            .prototype()
            .map_or(false, |proto| proto.has(key.as_str()))
    }

    /// Own keys in insertion order.
    ///
    /// Subscribes to the key set: the reader re-runs when keys are added or
    /// removed, not when an existing key changes value.
    pub fn own_keys(&self) -> Vec<Key> {
        self.track(TrackKey::Iterate);
        self.target.keys()
    }

    /// Number of own keys. Tracked like [`own_keys`](Self::own_keys).
    pub fn len(&self) -> usize {
        self.track(TrackKey::Iterate);
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, key: &Key, tracked: bool) -> Option<Field> {
        if tracked {
            self.track(TrackKey::Property(key.clone()));
        }

        match self.target.get(key.as_str()) {
            Some(value) => Some(self.field(value)),
            None => {
                let proto = self.target.prototype()?;
                let inherited = proto.read(key, tracked)?;
                Some(self.field(inherited.into_value()))
            }
        }
    }

    /// Untracked lookup through the prototype chain.
    fn peek(&self, key: &Key) -> Option<Value> {
        self.target
            .get(key.as_str())
            .or_else(|| self.target.prototype().and_then(|proto| proto.peek(key)))
    }

    fn field(&self, value: Value) -> Field {
        match value {
            Value::Object(object) if !self.mode.is_shallow() => {
                Field::Wrapped(Reactive::new(object, self.mode, self.runtime.clone()))
            }
            other => Field::Plain(other),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Assign a property.
    ///
    /// Subscribers are notified only if the new value differs from the old
    /// one (NaN over NaN is not a change). Read-only wrappers leave the object
    /// untouched and report [`ReactiveError::ReadOnly`].
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.assign(key.into(), value.into(), self);
    }

    /// Assign `key` on behalf of `receiver`, the wrapper the assignment was
    /// made through. Returns whether storage was written.
    fn assign(&self, key: Key, value: Value, receiver: &Reactive) -> bool {
        if self.mode.is_readonly() {
            self.reject(key);
            return false;
        }

        let kind = if self.target.contains_key(key.as_str()) {
            ChangeKind::Set
        } else {
            ChangeKind::Add
        };
        let old = self.peek(&key);

        let inherited = match (kind, self.target.prototype()) {
            (ChangeKind::Add, Some(proto)) if proto.peek(&key).is_some() => Some(proto),
            _ => None,
        };
        let written = match inherited {
            Some(proto) => proto.assign(key.clone(), value.clone(), receiver),
            None => {
                receiver.target.insert(key.clone(), value.clone());
                true
            }
        };

        // Only the wrapper the assignment was made through notifies.
        if !written || self.target.id() != receiver.target.id() {
            return written;
        }

        let changed = old.map_or(true, |old| !old.same_value(&value));
        if changed {
            self.trigger(TrackKey::Property(key), kind);
        }
        true
    }

    /// Delete an own property.
    ///
    /// Returns whether a key was removed. Deleting through a read-only
    /// wrapper removes nothing, reports [`ReactiveError::ReadOnly`] and
    /// still returns `true`, the same as a rejected `set` returning normally.
    pub fn delete(&self, key: &str) -> bool {
        let key = Key::from(key);
        if self.mode.is_readonly() {
            self.reject(key);
            return true;
        }

        let had_key = self.target.contains_key(key.as_str());
        let removed = self.target.remove(key.as_str()).is_some();
        if had_key && removed {
            self.trigger(TrackKey::Property(key), ChangeKind::Delete);
        }
        removed
    }

    /// Make `prototype` the parent consulted for keys this object lacks.
    ///
    /// Fails if the object would end up inheriting from itself.
    pub fn set_prototype(&self, prototype: Option<Reactive>) -> Result<()> {
        let mut cursor = prototype.clone();
        while let Some(ancestor) = cursor {
            if ancestor.id() == self.id() {
                return Err(ReactiveError::PrototypeCycle { object: self.id() });
            }
            cursor = ancestor.target.prototype();
        }
        self.target.set_prototype(prototype);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runtime plumbing
    // ------------------------------------------------------------------

    fn track(&self, key: TrackKey) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track(self.target.id(), || self.target.downgrade(), key);
        }
    }

    fn trigger(&self, key: TrackKey, kind: ChangeKind) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.trigger(self.target.id(), &key, kind);
        }
    }

    fn reject(&self, key: Key) {
        let error = ReactiveError::ReadOnly { key };
        match self.runtime.upgrade() {
            Some(runtime) => runtime.report(error),
            None => tracing::warn!(%error, "reactive diagnostic"),
        }
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.target.ptr_eq(&other.target) && self.mode == other.mode
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("id", &self.target.id())
            .field("mode", &self.mode)
            .finish()
    }
}

impl From<Reactive> for Field {
    fn from(reactive: Reactive) -> Self {
        Field::Wrapped(reactive)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn get_and_set() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("a", 1)]));

        assert_eq!(state.get("a").and_then(|f| f.as_f64()), Some(1.0));
        state.set("a", 42);
        assert_eq!(state.get("a").and_then(|f| f.as_f64()), Some(42.0));
        assert_eq!(state.raw().get("a"), Some(Value::from(42)));
    }

    #[test]
    fn reaction_reruns_on_write() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("a", 1)]));
        let (count, count_clone) = counter();

        let reader = state.clone();
        rt.effect(move || {
            reader.get("a");
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        state.set("a", 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Same value: no change record.
        state.set("a", 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Unrelated key: not subscribed.
        state.set("b", 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nan_reassignment_does_not_trigger() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("x", f64::NAN)]));
        let (count, count_clone) = counter();

        let reader = state.clone();
        rt.effect(move || {
            reader.get("x");
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        state.set("x", f64::NAN);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        state.set("x", 1.0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deep_wrapper_wraps_nested_objects() {
        let rt = Runtime::new();
        let inner = Object::from([("n", 1)]);
        let state = rt.reactive(Object::from([("inner", inner.clone())]));
        let (count, count_clone) = counter();

        let reader = state.clone();
        rt.effect(move || {
            if let Some(Field::Wrapped(nested)) = reader.get("inner") {
                nested.get("n");
            }
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let nested = state.get("inner").unwrap();
        let nested = nested.as_reactive().unwrap();
        assert_eq!(nested.mode(), Mode::Reactive);
        assert_eq!(nested.id(), inner.id());

        nested.set("n", 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shallow_wrapper_returns_raw_nested_objects() {
        let rt = Runtime::new();
        let inner = Object::from([("n", 1)]);
        let state = rt.shallow_reactive(Object::from([("inner", inner.clone())]));

        match state.get("inner") {
            Some(Field::Plain(Value::Object(o))) => assert!(o.ptr_eq(&inner)),
            other => panic!("expected raw object, got {other:?}"),
        }
    }

    #[test]
    fn readonly_propagates_and_rejects_writes() {
        let rt = Runtime::new();
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let rejected_clone = rejected.clone();
        rt.on_diagnostic(move |err| {
            if let ReactiveError::ReadOnly { key } = err {
                rejected_clone.lock().push(key.to_string());
            }
        });

        let state = rt.readonly(
            Object::new()
                .with("a", 1)
                .with("inner", Object::from([("n", 1)])),
        );

        state.set("a", 2);
        assert!(state.delete("a"));
        assert_eq!(state.raw().get("a"), Some(Value::from(1)));

        let nested = state.get("inner").unwrap();
        let nested = nested.as_reactive().unwrap();
        assert_eq!(nested.mode(), Mode::Readonly);
        nested.set("n", 5);
        assert_eq!(nested.raw().get("n"), Some(Value::from(1)));

        assert_eq!(*rejected.lock(), vec!["a", "a", "n"]);
    }

    #[test]
    fn shallow_readonly_returns_mutable_raw_children() {
        let rt = Runtime::new();
        let state = rt.shallow_readonly(Object::from([("inner", Object::from([("n", 1)]))]));

        let inner = state.get("inner").unwrap().into_value();
        let inner = inner.as_object().unwrap();
        inner.insert("n", 2);
        assert_eq!(inner.get("n"), Some(Value::from(2)));
    }

    #[test]
    fn has_is_tracked_as_key_read() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::new());
        let (count, count_clone) = counter();

        let reader = state.clone();
        rt.effect(move || {
            reader.has("a");
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!state.has("a"));

        state.set("a", 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(state.has("a"));
    }

    #[test]
    fn enumeration_reruns_on_add_and_delete_only() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("a", 1)]));
        let (count, count_clone) = counter();

        let reader = state.clone();
        rt.effect(move || {
            reader.own_keys();
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        state.set("a", 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        state.set("b", 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(state.delete("b"));
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // Deleting a missing key changes nothing.
        assert!(!state.delete("missing"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delete_reruns_direct_reader() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("a", 1), ("b", 2)]));
        let (count, count_clone) = counter();

        let reader = state.clone();
        let reaction = rt.effect(move || {
            reader.get("a");
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Unrelated key
        assert!(state.delete("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(state.delete("a"));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // The re-run read the now-missing key and subscribed again.
        assert_eq!(rt.subscriber_count(state.id(), &TrackKey::from("a")), 1);
        assert_eq!(reaction.dependency_count(), 1);

        state.set("a", 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn inherited_assignment_notifies_once() {
        let rt = Runtime::new();
        let parent = rt.reactive(Object::from([("bar", 1)]));
        let child = rt.reactive(Object::new());
        child.set_prototype(Some(parent.clone())).unwrap();
        let (count, count_clone) = counter();

        let reader = child.clone();
        rt.effect(move || {
            reader.get("bar");
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(child.get("bar").and_then(|f| f.as_f64()), Some(1.0));

        child.set("bar", 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // The assignment created an own key on the child only.
        assert_eq!(child.raw().get("bar"), Some(Value::from(2)));
        assert_eq!(parent.raw().get("bar"), Some(Value::from(1)));
    }

    #[test]
    fn prototype_cycles_are_rejected() {
        let rt = Runtime::new();
        let a = rt.reactive(Object::new());
        let b = rt.reactive(Object::new());

        b.set_prototype(Some(a.clone())).unwrap();
        let err = a.set_prototype(Some(b)).unwrap_err();
        assert!(matches!(err, ReactiveError::PrototypeCycle { .. }));
    }

    #[test]
    fn writes_after_runtime_drop_are_untracked() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::from([("a", 1)]));
        drop(rt);

        state.set("a", 2);
        assert_eq!(state.get("a").and_then(|f| f.as_f64()), Some(2.0));
    }
}
