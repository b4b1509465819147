//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects wrapped objects,
//! reactions, derived values and watchers. It owns the subscription store,
//! the execution context and the microtask queue.
//!
//! # How It Works
//!
//! 1. When a wrapped object is read inside a running reaction, the runtime
//!    records the dependency in the store and in the reaction.
//!
//! 2. When a wrapped object is written, the runtime:
//!    a. Collects the subscribers of the written key (plus the key-set
//!       subscribers for additions and deletions)
//!    b. Drops the reaction that issued the write from that set
//!    c. Dispatches each remaining reaction, synchronously or through its
//!       scheduler
//!
//! 3. Deferred work (coalesced jobs, post-flush watchers) goes through the
//!    microtask queue, which the host drains with [`Runtime::run_microtasks`]
//!    at the end of each synchronous burst.
//!
//! # Isolation
//!
//! All state lives in the runtime instance rather than in globals, so
//! independent runtimes never observe each other's reactions.

use std::any::Any;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::value::{Object, ObjectId};
use super::context::ExecutionContext;
use super::queue::MicrotaskQueue;
use super::reaction::{Reaction, ReactionOptions, ReactionRef};
use super::store::{ChangeKind, SubscriptionStore, TrackKey};
use super::wrapper::{Mode, Reactive};

type DiagnosticHandler = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

pub(crate) struct RuntimeInner {
    pub(crate) store: SubscriptionStore,
    pub(crate) context: ExecutionContext,
    pub(crate) microtasks: MicrotaskQueue,
    config: RuntimeConfig,
    diagnostics: RwLock<Option<DiagnosticHandler>>,
}

impl RuntimeInner {
    /// Record that the active reaction (if any) read `(target, key)`.
    pub(crate) fn track<F>(&self, target: ObjectId, owner: F, key: TrackKey)
    where
        F: FnOnce() -> Weak<dyn Any + Send + Sync>,
    {
        let Some(reaction) = self.context.active() else {
            return;
        };
        let dep = self.store.dep_for(target, owner, key);
        reaction.subscribe(&dep);
    }

    /// Notify every reaction affected by a change to `(target, key)`.
    pub(crate) fn trigger(&self, target: ObjectId, key: &TrackKey, kind: ChangeKind) {
        let mut to_run: IndexSet<ReactionRef> = self.store.subscribers(target, key).into_iter().collect();
        if kind.affects_keys() {
            to_run.extend(self.store.subscribers(target, &TrackKey::Iterate));
        }

        // A reaction writing state it also reads must not re-enter itself.
        if let Some(active) = self.context.active() {
            to_run.shift_remove(&active);
        }

        tracing::trace!(
            target = target.raw(),
            ?key,
            ?kind,
            reactions = to_run.len(),
            "trigger"
        );

        for reaction in to_run {
            reaction.dispatch();
        }
    }

    /// Report a non-fatal diagnostic.
    pub(crate) fn report(&self, error: ReactiveError) {
        let readonly = matches!(error, ReactiveError::ReadOnly { .. });
        if !readonly || self.config.warn_on_readonly {
            tracing::warn!(%error, "reactive diagnostic");
        }

        let handler = self.diagnostics.read().clone();
        if let Some(handler) = handler {
            handler(&error);
        }
    }
}

/// Handle to a reactive runtime.
///
/// Cloning the handle shares the runtime. Wrapped objects and reactions only
/// hold weak references back to it, so dropping every `Runtime` handle tears
/// the engine down; objects stay readable but nothing is tracked anymore.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store: SubscriptionStore::new(),
                context: ExecutionContext::new(),
                microtasks: MicrotaskQueue::new(),
                config,
                diagnostics: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    // ------------------------------------------------------------------
    // Wrapping
    // ------------------------------------------------------------------

    /// Wrap `object` so that accesses through the wrapper are observed.
    pub fn wrap(&self, object: Object, mode: Mode) -> Reactive {
        Reactive::new(object, mode, self.downgrade())
    }

    /// Deep, mutable wrapper.
    pub fn reactive(&self, object: Object) -> Reactive {
        self.wrap(object, Mode::Reactive)
    }

    /// Mutable wrapper whose nested objects are returned unwrapped.
    pub fn shallow_reactive(&self, object: Object) -> Reactive {
        self.wrap(object, Mode::ShallowReactive)
    }

    /// Deep, read-only wrapper.
    pub fn readonly(&self, object: Object) -> Reactive {
        self.wrap(object, Mode::Readonly)
    }

    /// Read-only wrapper whose nested objects are returned unwrapped.
    pub fn shallow_readonly(&self, object: Object) -> Reactive {
        self.wrap(object, Mode::ShallowReadonly)
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    /// Create a reaction.
    ///
    /// Unless `options.deferred` is set, the body runs once right away.
    /// Dropping the handle does not stop the reaction: the subscription store
    /// keeps it (and whatever its body captured) alive for as long as it has
    /// dependencies. Call [`Reaction::dispose`] to release it.
    pub fn create_reaction<T, F>(&self, body: F, options: ReactionOptions) -> Reaction<T>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let reaction = Reaction::new(body, options.scheduler, self.downgrade());
        if !options.deferred {
            reaction.handle().run();
        }
        reaction
    }

    /// Shorthand for an immediately-running reaction without a scheduler.
    pub fn effect<F>(&self, body: F) -> Reaction<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.create_reaction(body, ReactionOptions::default())
    }

    /// The reaction currently running, if any.
    pub fn active_reaction(&self) -> Option<ReactionRef> {
        self.inner.context.active()
    }

    /// Run `f` without tracking reads against the active reaction.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.context.enter(None);
        f()
    }

    /// Record a read of `key` on `target` by the active reaction.
    pub fn track(&self, target: &Object, key: TrackKey) {
        self.inner.track(target.id(), || target.downgrade(), key);
    }

    /// Notify the subscribers of `(target, key)` of a change.
    pub fn trigger(&self, target: ObjectId, key: &TrackKey, kind: ChangeKind) {
        self.inner.trigger(target, key, kind);
    }

    // ------------------------------------------------------------------
    // Microtasks
    // ------------------------------------------------------------------

    /// Queue `task` to run on the next microtask drain.
    pub fn queue_microtask<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.microtasks.push(Box::new(task));
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.inner.microtasks.is_empty()
    }

    /// Run queued microtasks, including ones queued while draining.
    ///
    /// Returns the number of tasks executed, or an error once more than
    /// `max_microtasks_per_drain` tasks ran in this call. Tasks still queued
    /// at that point are kept for the next drain.
    pub fn run_microtasks(&self) -> Result<usize> {
        let limit = self.inner.config.max_microtasks_per_drain;
        let mut executed = 0;

        loop {
            if executed >= limit && !self.inner.microtasks.is_empty() {
                return Err(ReactiveError::MicrotaskLimit { limit });
            }
            let Some(task) = self.inner.microtasks.pop() else {
                break;
            };
            task();
            executed += 1;
        }

        if executed > 0 {
            tracing::debug!(executed, "drained microtasks");
        }
        Ok(executed)
    }

    // ------------------------------------------------------------------
    // Diagnostics & store maintenance
    // ------------------------------------------------------------------

    /// Install a handler that receives every non-fatal diagnostic.
    pub fn on_diagnostic<F>(&self, handler: F)
    where
        F: Fn(&ReactiveError) + Send + Sync + 'static,
    {
        *self.inner.diagnostics.write() = Some(Arc::new(handler));
    }

    /// Drop subscriptions whose target no longer exists.
    pub fn sweep(&self) -> usize {
        self.inner.store.sweep()
    }

    /// Number of reactions subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: ObjectId, key: &TrackKey) -> usize {
        self.inner.store.subscriber_count(target, key)
    }

    /// Number of targets with at least one subscription entry.
    pub fn tracked_target_count(&self) -> usize {
        self.inner.store.target_count()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("store", &self.inner.store)
            .field("context_depth", &self.inner.context.depth())
            .field("pending_microtasks", &self.inner.microtasks.len())
            .finish()
    }
}
