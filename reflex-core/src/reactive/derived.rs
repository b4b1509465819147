//! Derived Value Implementation
//!
//! A Derived value is a cached computation over reactive state that
//! re-evaluates only when its dependencies change.
//!
//! # How Derived Values Work
//!
//! 1. The getter runs inside a deferred inner reaction, so nothing is
//!    computed until the first read of [`Derived::value`].
//!
//! 2. When a dependency changes, the inner reaction's scheduler does not
//!    recompute. It only marks the cell dirty and, on the clean -> dirty
//!    transition, notifies whoever read the cell.
//!
//! 3. The next read recomputes, caches, and marks the cell clean.
//!
//! # Two-Level Tracking
//!
//! A reaction reading `value()` subscribes to the cell itself, never to the
//! state the getter reads. Only the inner reaction subscribes to that state.
//! Without this split an outer reaction would re-run for every source write
//! in addition to the cell's own notification.

use std::any::Any;
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::value::ObjectId;
use super::reaction::{Reaction, ReactionOptions, ReactionRef};
use super::runtime::{Runtime, RuntimeInner};
use super::store::{ChangeKind, TrackKey};

struct DerivedState<T> {
    /// The cached value (None if never computed).
    value: Option<T>,

    /// Whether the cached value is stale.
    dirty: bool,
}

struct DerivedInner<T> {
    /// Identity of the cell in the subscription store.
    id: ObjectId,

    getter: Arc<dyn Fn() -> T + Send + Sync>,

    /// Runs the getter with tracking.
    reaction: Reaction<T>,

    state: Mutex<DerivedState<T>>,

    runtime: Weak<RuntimeInner>,
}

impl<T> DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Scheduler hook of the inner reaction.
    fn invalidate(&self) {
        let became_dirty = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.dirty, true)
        };
        if !became_dirty {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.trigger(self.id, &TrackKey::DerivedValue, ChangeKind::Set);
        }
    }

    fn recompute(&self) -> T {
        // The inner reaction only refuses to run once disposed, which
        // happens when the cell is dropped; fall back to an untracked call.
        let value = self.reaction.run().unwrap_or_else(|| (self.getter)());

        let mut state = self.state.lock();
        state.value = Some(value.clone());
        state.dirty = false;
        value
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        self.reaction.dispose();
    }
}

/// A cached value derived from reactive state.
///
/// Cloning shares the cell.
///
/// ```rust
/// use reflex_core::{Object, Runtime};
///
/// let rt = Runtime::new();
/// let state = rt.reactive(Object::from([("a", 1), ("b", 2)]));
///
/// let reader = state.clone();
/// let sum = rt.derive(move || {
///     let a = reader.get("a").and_then(|f| f.as_f64()).unwrap_or(0.0);
///     let b = reader.get("b").and_then(|f| f.as_f64()).unwrap_or(0.0);
///     a + b
/// });
///
/// assert_eq!(sum.value(), 3.0);
/// state.set("a", 10);
/// assert_eq!(sum.value(), 12.0);
/// ```
pub struct Derived<T> {
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the current value, recomputing if necessary.
    pub fn value(&self) -> T {
        let cached = {
            let state = self.inner.state.lock();
            if state.dirty {
                None
            } else {
                state.value.clone()
            }
        };
        let value = match cached {
            Some(value) => value,
            None => self.inner.recompute(),
        };

        if let Some(runtime) = self.inner.runtime.upgrade() {
            let owner = Arc::downgrade(&self.inner);
            runtime.track(
                self.inner.id,
                move || -> Weak<dyn Any + Send + Sync> { owner },
                TrackKey::DerivedValue,
            );
        }
        value
    }

    /// Identity of the cell, usable with [`Runtime::trigger`].
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// Check if the cell has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.state.lock().value.is_some()
    }

    /// Number of times the getter has run with tracking.
    pub fn compute_count(&self) -> usize {
        self.inner.reaction.run_count()
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Derived<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("dirty", &state.dirty)
            .field("value", &state.value)
            .finish()
    }
}

impl Runtime {
    /// Create a lazily computed, cached value.
    pub fn derive<T, F>(&self, getter: F) -> Derived<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let getter: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(getter);

        let inner = Arc::new_cyclic(|cell: &Weak<DerivedInner<T>>| {
            let cell = cell.clone();
            let options = ReactionOptions::new()
                .deferred()
                .with_scheduler(move |_: ReactionRef| {
                    if let Some(cell) = cell.upgrade() {
                        cell.invalidate();
                    }
                });

            let body = Arc::clone(&getter);
            DerivedInner {
                id: ObjectId::new(),
                getter,
                reaction: self.create_reaction(move || body(), options),
                state: Mutex::new(DerivedState {
                    value: None,
                    dirty: true,
                }),
                runtime: self.downgrade(),
            }
        });

        Derived { inner }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
