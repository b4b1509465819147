//! Observed Values
//!
//! This module defines the dynamic, structured data that the reactive engine
//! observes. Application code builds plain [`Object`]s and hands them to a
//! [`Runtime`](crate::reactive::Runtime) to be wrapped; the engine never owns
//! them and only keeps weak associations keyed by their identity.
//!
//! # Identity
//!
//! Objects are shared handles. Cloning an `Object` yields another handle to
//! the same storage, and two objects are "the same" only when they share an
//! [`ObjectId`]. Values stored inside objects compare with
//! [`Value::same_value`], which treats two NaNs as equal so that assigning
//! NaN over NaN is not reported as a change.

use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::reactive::Reactive;

/// Unique identifier for an observed target.
///
/// Objects and derived cells draw from the same counter so they can share
/// one subscription store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A property key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self(Arc::from(index.to_string()))
    }
}

/// A dynamically typed value stored in an [`Object`].
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    /// A nested object, compared by identity.
    Object(Object),
}

impl Value {
    /// Identity-aware equality used to decide whether a write is a change.
    ///
    /// Numbers compare numerically except that NaN equals NaN (and `0.0`
    /// equals `-0.0`). Objects compare by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Snapshot this value as JSON.
    ///
    /// Non-finite numbers and already-visited objects become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_inner(&mut HashSet::new())
    }

    fn to_json_inner(&self, seen: &mut HashSet<ObjectId>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Object(o) => o.to_json_inner(seen),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<serde_json::Value> for Value {
    /// Build fresh objects from JSON. Arrays become objects keyed by index.
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => Value::Object(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (Key::from(i), Value::from(item)))
                    .collect(),
            ),
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (Key::from(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Shared storage behind an [`Object`] handle.
struct ObjectInner {
    id: ObjectId,

    /// Own properties, in insertion order.
    fields: RwLock<IndexMap<Key, Value>>,

    /// Parent consulted for keys this object does not own.
    prototype: RwLock<Option<Reactive>>,
}

/// A plain mutable object.
///
/// All methods here are untracked: they read and write storage directly.
/// Wrap the object with a runtime to make accesses observable.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Object {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: ObjectId::new(),
                fields: RwLock::new(IndexMap::new()),
                prototype: RwLock::new(None),
            }),
        }
    }

    /// Builder-style insert.
    pub fn with(self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Check whether two handles refer to the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get an own property.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.fields.read().get(key).cloned()
    }

    /// Check whether `key` is an own property.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    /// Insert or overwrite an own property, returning the previous value.
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        self.inner.fields.write().insert(key.into(), value.into())
    }

    /// Remove an own property, preserving the order of the remaining keys.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.fields.write().shift_remove(key)
    }

    /// Own keys in insertion order.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.read().is_empty()
    }

    pub fn prototype(&self) -> Option<Reactive> {
        self.inner.prototype.read().clone()
    }

    pub(crate) fn set_prototype(&self, prototype: Option<Reactive>) {
        *self.inner.prototype.write() = prototype;
    }

    /// Weak handle used by the subscription store to detect dropped objects.
    pub(crate) fn downgrade(&self) -> Weak<dyn Any + Send + Sync> {
        let weak: Weak<ObjectInner> = Arc::downgrade(&self.inner);
        weak
    }

    /// Snapshot the object (and everything reachable from it) as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_inner(&mut HashSet::new())
    }

    fn to_json_inner(&self, seen: &mut HashSet<ObjectId>) -> serde_json::Value {
        if !seen.insert(self.id()) {
            return serde_json::Value::Null;
        }
        // Clone out of the lock so nested objects are read without holding it.
        let fields: Vec<(Key, Value)> = self
            .inner
            .fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let map = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_json_inner(seen)))
            .collect();
        seen.remove(&self.id());
        serde_json::Value::Object(map)
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id())
            .field("keys", &self.keys())
            .finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<Key>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        for (k, v) in iter {
            object.insert(k, v);
        }
        object
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Object
where
    K: Into<Key>,
    V: Into<Value>,
{
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
