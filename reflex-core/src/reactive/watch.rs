//! Watchers
//!
//! A watcher calls back with the new and previous value of a source each
//! time the source changes. Unlike a plain reaction, the callback itself is
//! never tracked: only the source is.
//!
//! # Sources
//!
//! - [`WatchSource::Getter`]: any closure over reactive state.
//! - [`WatchSource::Tree`]: a wrapped object. Every field reachable from the
//!   root, own or inherited through a prototype, is read on each run, so a
//!   change at any depth fires the watcher. Cycles in the object graph are
//!   cut with a visited set.
//!
//! # Flush Timing
//!
//! With [`Flush::Sync`] the callback runs inside the write that caused it.
//! With [`Flush::Post`] it runs on the next microtask drain, and a burst of
//! writes produces a single callback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::value::ObjectId;
use super::reaction::{Reaction, ReactionOptions, ReactionRef};
use super::runtime::{Runtime, RuntimeInner};
use super::wrapper::{Field, Reactive};

/// When a watcher callback runs relative to the triggering write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flush {
    #[default]
    Sync,
    Post,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Call back once at registration with no previous value.
    pub immediate: bool,

    pub flush: Flush,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }
}

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Projection<T> = Arc<dyn Fn(&Reactive) -> T + Send + Sync>;

/// What a watcher observes.
pub enum WatchSource<T> {
    Getter(Getter<T>),

    /// Deep observation of `root`; the callback receives `project(&root)`.
    Tree {
        root: Reactive,
        project: Projection<T>,
    },
}

impl<T: 'static> WatchSource<T> {
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::Getter(Arc::new(getter))
    }

    pub fn tree_with<P>(root: Reactive, project: P) -> Self
    where
        P: Fn(&Reactive) -> T + Send + Sync + 'static,
    {
        Self::Tree {
            root,
            project: Arc::new(project),
        }
    }

    fn into_getter(self) -> Getter<T> {
        match self {
            Self::Getter(getter) => getter,
            Self::Tree { root, project } => Arc::new(move || {
                let mut seen = HashSet::new();
                traverse(&root, &mut seen);
                project(&root)
            }),
        }
    }
}

impl WatchSource<Reactive> {
    /// Deep observation of `root`, handing the root itself to the callback.
    pub fn tree(root: Reactive) -> Self {
        Self::tree_with(root, Reactive::clone)
    }
}

/// Read every field reachable from `node`, including its prototype chain.
fn traverse(node: &Reactive, seen: &mut HashSet<ObjectId>) {
    if !seen.insert(node.id()) {
        return;
    }
    for key in node.own_keys() {
        if let Some(Field::Wrapped(child)) = node.get(key.as_str()) {
            traverse(&child, seen);
        }
    }
    if let Some(proto) = node.raw().prototype() {
        traverse(&proto, seen);
    }
}

struct WatchJob<T> {
    /// Taken out on stop.
    reaction: Mutex<Option<Reaction<T>>>,

    /// The value passed as "previous" to the next callback.
    old: Mutex<Option<T>>,

    callback: Box<dyn Fn(&T, Option<&T>) + Send + Sync>,

    stopped: AtomicBool,

    /// A post-flush run is sitting in the microtask queue.
    queued: AtomicBool,

    runtime: Weak<RuntimeInner>,
}

impl<T> WatchJob<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn run(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let Some(reaction) = self.reaction.lock().clone() else {
            return;
        };
        let Some(new) = reaction.run() else {
            return;
        };

        let previous = self.old.lock().replace(new.clone());

        // Reads made by the callback belong to no reaction, not even the one
        // whose write fired the watcher.
        let runtime = self.runtime.upgrade();
        let _untracked = runtime.as_ref().map(|runtime| runtime.context.enter(None));
        (self.callback)(&new, previous.as_ref());
    }

    fn schedule(self: &Arc<Self>, flush: Flush) {
        match flush {
            Flush::Sync => self.run(),
            Flush::Post => {
                if self.queued.swap(true, Ordering::SeqCst) {
                    return;
                }
                let Some(runtime) = self.runtime.upgrade() else {
                    return;
                };
                let job = Arc::clone(self);
                runtime.microtasks.push(Box::new(move || {
                    job.queued.store(false, Ordering::SeqCst);
                    job.run();
                }));
            }
        }
    }
}

trait WatchHandle: Send + Sync {
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

impl<T> WatchHandle for WatchJob<T>
where
    T: Send + Sync + 'static,
{
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(reaction) = self.reaction.lock().take() {
            reaction.dispose();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Handle returned by [`Runtime::watch`].
///
/// A watcher stays active until [`stop`](Self::stop) is called; dropping the
/// handle does not stop it.
#[derive(Clone)]
pub struct Watcher {
    job: Arc<dyn WatchHandle>,
}

impl Watcher {
    /// Stop watching. Post-flush callbacks still queued are skipped.
    pub fn stop(&self) {
        self.job.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.job.is_stopped()
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Runtime {
    /// Call `callback(new, previous)` whenever `source` changes.
    ///
    /// Without `immediate`, the source is evaluated once at registration to
    /// record the first previous value and the callback first fires on the
    /// next change.
    pub fn watch<T, C>(&self, source: WatchSource<T>, callback: C, options: WatchOptions) -> Watcher
    where
        T: Clone + Send + Sync + 'static,
        C: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        let getter = source.into_getter();
        let job = Arc::new(WatchJob {
            reaction: Mutex::new(None),
            old: Mutex::new(None),
            callback: Box::new(callback),
            stopped: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            runtime: self.downgrade(),
        });

        let scheduled = Arc::clone(&job);
        let flush = options.flush;
        let reaction = self.create_reaction(
            move || getter(),
            ReactionOptions::new()
                .deferred()
                .with_scheduler(move |_: ReactionRef| scheduled.schedule(flush)),
        );
        *job.reaction.lock() = Some(reaction.clone());

        if options.immediate {
            job.run();
        } else {
            *job.old.lock() = reaction.run();
        }

        tracing::debug!(reaction = reaction.id().raw(), ?options, "watcher registered");
        Watcher { job }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
