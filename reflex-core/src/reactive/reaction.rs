//! Reaction Implementation
//!
//! A Reaction is a computation that re-runs whenever the tracked state it
//! read during its last run changes.
//!
//! # How Reactions Work
//!
//! 1. When created, the reaction runs its body immediately (unless it is
//!    deferred) to establish initial dependencies.
//!
//! 2. Every tracked read performed while the body runs adds the reaction to
//!    the subscription set for that (target, key) and records the set in
//!    the reaction's own dependency list.
//!
//! 3. Before re-running, the reaction removes itself from every set in that
//!    list. Dependencies are rebuilt from scratch on each run, so a branch
//!    that is no longer taken stops notifying the reaction.
//!
//! 4. When a dependency changes, the reaction is either run on the spot or
//!    handed to its [`Scheduler`].
//!
//! # Handles
//!
//! [`ReactionRef`] is the untyped handle stored in subscription sets and
//! passed to schedulers. [`Reaction<T>`] is the typed handle returned by
//! [`Runtime::create_reaction`](super::Runtime::create_reaction); running it
//! yields the body's result.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::runtime::RuntimeInner;
use super::store::{Dep, WeakDep};

/// Unique identifier for a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactionId(u64);

impl ReactionId {
    /// Generate a new unique reaction ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ReactionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when a dispatched reaction actually runs.
///
/// Hosts supply their own schedulers (for example "defer to the next
/// frame"); [`JobQueue`](super::JobQueue) is the built-in coalescing one.
/// Any `Fn(ReactionRef)` closure is a scheduler.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, reaction: ReactionRef);
}

impl<F> Scheduler for F
where
    F: Fn(ReactionRef) + Send + Sync,
{
    fn schedule(&self, reaction: ReactionRef) {
        self(reaction)
    }
}

/// Options accepted by [`Runtime::create_reaction`](super::Runtime::create_reaction).
#[derive(Clone, Default)]
pub struct ReactionOptions {
    /// Receives the reaction whenever a dependency changes, instead of the
    /// reaction running synchronously.
    pub scheduler: Option<Arc<dyn Scheduler>>,

    /// Do not run the body on creation.
    pub deferred: bool,
}

impl ReactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn with_scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn with_shared_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl fmt::Debug for ReactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionOptions")
            .field("scheduler", &self.scheduler.is_some())
            .field("deferred", &self.deferred)
            .finish()
    }
}

pub(crate) struct ReactionInner {
    id: ReactionId,

    /// The reaction body.
    body: Box<dyn Fn() + Send + Sync>,

    scheduler: Option<Arc<dyn Scheduler>>,

    /// Every subscription set this reaction currently belongs to.
    deps: Mutex<SmallVec<[WeakDep; 4]>>,

    /// Whether the reaction has been disposed.
    disposed: AtomicBool,

    /// Number of times the body has run.
    run_count: AtomicUsize,

    runtime: Weak<RuntimeInner>,
}

/// Untyped, cloneable handle to a reaction.
///
/// Handles compare and hash by reaction identity.
#[derive(Clone)]
pub struct ReactionRef {
    inner: Arc<ReactionInner>,
}

impl ReactionRef {
    pub(crate) fn new(
        body: Box<dyn Fn() + Send + Sync>,
        scheduler: Option<Arc<dyn Scheduler>>,
        runtime: Weak<RuntimeInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ReactionInner {
                id: ReactionId::new(),
                body,
                scheduler,
                deps: Mutex::new(SmallVec::new()),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                runtime,
            }),
        }
    }

    /// A reaction bound to no runtime. Its reads are never tracked.
    #[cfg(test)]
    pub(crate) fn detached<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(Box::new(body), None, Weak::new())
    }

    pub fn id(&self) -> ReactionId {
        self.inner.id
    }

    /// Run the reaction now.
    ///
    /// Clears the previous dependencies, makes this the active reaction and
    /// runs the body. Returns `false` if the reaction has been disposed.
    pub fn run(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        self.cleanup();

        let runtime = self.inner.runtime.upgrade();
        let _guard = runtime
            .as_ref()
            .map(|runtime| runtime.context.enter(Some(self.clone())));

        tracing::trace!(reaction = self.inner.id.raw(), "running reaction");
        (self.inner.body)();

        self.inner.run_count.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Hand the reaction to its scheduler, or run it if it has none.
    pub(crate) fn dispatch(&self) {
        match &self.inner.scheduler {
            Some(scheduler) => scheduler.schedule(self.clone()),
            None => {
                self.run();
            }
        }
    }

    /// Subscribe to `dep` and remember it for cleanup.
    pub(crate) fn subscribe(&self, dep: &Dep) {
        if dep.lock().insert(self.clone()) {
            self.inner.deps.lock().push(Arc::downgrade(dep));
        }
    }

    /// Remove this reaction from every subscription set it belongs to.
    fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.inner.deps.lock());
        for dep in deps {
            if let Some(dep) = dep.upgrade() {
                dep.lock().shift_remove(self);
            }
        }
    }

    /// Stop the reaction for good.
    ///
    /// The reaction leaves every subscription set immediately and any later
    /// dispatch or run is ignored.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.cleanup();
    }

    /// Check if the reaction has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of live subscription sets this reaction belongs to.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .deps
            .lock()
            .iter()
            .filter(|dep| dep.strong_count() > 0)
            .count()
    }

    pub fn has_scheduler(&self) -> bool {
        self.inner.scheduler.is_some()
    }
}

impl PartialEq for ReactionRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ReactionRef {}

impl Hash for ReactionRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ReactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.inner.id.raw())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Typed handle to a reaction whose body returns `T`.
pub struct Reaction<T> {
    core: ReactionRef,

    /// Where the body leaves its latest result.
    output: Arc<Mutex<Option<T>>>,
}

impl<T> Reaction<T>
where
    T: Send + 'static,
{
    pub(crate) fn new<F>(
        body: F,
        scheduler: Option<Arc<dyn Scheduler>>,
        runtime: Weak<RuntimeInner>,
    ) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let output = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&output);
        let core = ReactionRef::new(
            Box::new(move || {
                let value = body();
                *slot.lock() = Some(value);
            }),
            scheduler,
            runtime,
        );
        Self { core, output }
    }

    /// Run the reaction and return the body's result.
    ///
    /// Returns `None` if the reaction has been disposed.
    pub fn run(&self) -> Option<T> {
        if !self.core.run() {
            return None;
        }
        self.output.lock().take()
    }
}

impl<T> Reaction<T> {
    /// The untyped handle.
    pub fn handle(&self) -> &ReactionRef {
        &self.core
    }

    pub fn id(&self) -> ReactionId {
        self.core.id()
    }

    pub fn dispose(&self) {
        self.core.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    pub fn run_count(&self) -> usize {
        self.core.run_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.core.dependency_count()
    }
}

impl<T> Clone for Reaction<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            output: Arc::clone(&self.output),
        }
    }
}

impl<T> fmt::Debug for Reaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
