//! Deferred Execution
//!
//! Two queues live here:
//!
//! - [`MicrotaskQueue`] is the runtime's "run soon" queue. Tasks queued during
//!   a synchronous burst of writes run when the host calls
//!   [`Runtime::run_microtasks`](super::Runtime::run_microtasks), before it
//!   moves on to any later work.
//!
//! - [`JobQueue`] is a [`Scheduler`] that coalesces reactions. Dispatching the
//!   same reaction several times before the next drain runs it once.
//!
//! # Flush Algorithm
//!
//! 1. `schedule` inserts the reaction into an insertion-ordered set. The
//!    first insertion of a burst also queues one flush microtask.
//! 2. The flush takes the whole set and clears the "flush queued" flag
//!    before running anything.
//! 3. Each reaction runs once, in first-enqueue order.
//! 4. Reactions dispatched while the flush is running land in a fresh set
//!    and get a flush of their own.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::reaction::{ReactionRef, Scheduler};
use super::runtime::{Runtime, RuntimeInner};

pub(crate) type Microtask = Box<dyn FnOnce() + Send>;

/// FIFO of tasks waiting for the next drain.
#[derive(Default)]
pub(crate) struct MicrotaskQueue {
    tasks: Mutex<VecDeque<Microtask>>,
}

impl MicrotaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, task: Microtask) {
        self.tasks.lock().push_back(task);
    }

    pub(crate) fn pop(&self) -> Option<Microtask> {
        self.tasks.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[derive(Default)]
struct JobState {
    pending: IndexSet<ReactionRef>,
    flush_queued: bool,
}

/// Coalescing scheduler backed by the runtime's microtask queue.
///
/// Clones share the same pending set, so one queue can serve many
/// reactions.
///
/// ```rust
/// use reflex_core::{Object, ReactionOptions, Runtime};
/// use reflex_core::reactive::JobQueue;
///
/// let rt = Runtime::new();
/// let state = rt.reactive(Object::from([("n", 0)]));
/// let queue = JobQueue::new(&rt);
///
/// let reader = state.clone();
/// let reaction = rt.create_reaction(
///     move || reader.get("n"),
///     ReactionOptions::new().with_scheduler(queue),
/// );
///
/// state.set("n", 1);
/// state.set("n", 2);
/// rt.run_microtasks().unwrap();
/// assert_eq!(reaction.run_count(), 2); // creation + one coalesced run
/// ```
#[derive(Clone)]
pub struct JobQueue {
    runtime: Weak<RuntimeInner>,
    state: Arc<Mutex<JobState>>,
}

impl JobQueue {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.downgrade(),
            state: Arc::new(Mutex::new(JobState::default())),
        }
    }

    /// Number of reactions waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Run the pending reactions now instead of waiting for the microtask.
    ///
    /// The already-queued flush microtask then finds nothing to do.
    pub fn flush(&self) -> usize {
        flush(&self.state)
    }
}

impl Scheduler for JobQueue {
    fn schedule(&self, reaction: ReactionRef) {
        let queue_flush = {
            let mut state = self.state.lock();
            state.pending.insert(reaction);
            !std::mem::replace(&mut state.flush_queued, true)
        };
        if !queue_flush {
            return;
        }

        match self.runtime.upgrade() {
            Some(runtime) => {
                let state = Arc::clone(&self.state);
                runtime.microtasks.push(Box::new(move || {
                    flush(&state);
                }));
            }
            None => {
                // No runtime left to drain microtasks; drop the work.
                let mut state = self.state.lock();
                state.pending.clear();
                state.flush_queued = false;
            }
        }
    }
}

fn flush(state: &Mutex<JobState>) -> usize {
    let jobs = {
        let mut state = state.lock();
        state.flush_queued = false;
        std::mem::take(&mut state.pending)
    };

    let count = jobs.len();
    if count > 0 {
        tracing::debug!(jobs = count, "flushing job queue");
    }
    for job in jobs {
        job.run();
    }
    count
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JobQueue")
            .field("pending", &state.pending.len())
            .field("flush_queued", &state.flush_queued)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactionOptions;
    use crate::value::Object;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn schedule_coalesces_duplicates() {
        let rt = Runtime::new();
        let queue = JobQueue::new(&rt);
        let run_count = Arc::new(AtomicI32::new(0));

        let run_count_clone = run_count.clone();
        let reaction = rt.create_reaction(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            },
            ReactionOptions::new().deferred(),
        );

        queue.schedule(reaction.handle().clone());
        queue.schedule(reaction.handle().clone());
        queue.schedule(reaction.handle().clone());
        assert_eq!(queue.pending(), 1);
        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        assert_eq!(rt.run_microtasks().unwrap(), 1);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn flush_runs_in_first_enqueue_order() {
        let rt = Runtime::new();
        let queue = JobQueue::new(&rt);
        let order = Arc::new(Mutex::new(Vec::new()));

        let reactions: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                rt.create_reaction(move || order.lock().push(i), ReactionOptions::new().deferred())
            })
            .collect();

        queue.schedule(reactions[2].handle().clone());
        queue.schedule(reactions[0].handle().clone());
        queue.schedule(reactions[2].handle().clone());
        queue.schedule(reactions[1].handle().clone());

        assert_eq!(queue.flush(), 3);
        assert_eq!(*order.lock(), vec![2, 0, 1]);

        // The queued microtask finds an empty set.
        assert_eq!(rt.run_microtasks().unwrap(), 1);
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn dispatch_during_flush_gets_new_cycle() {
        let rt = Runtime::new();
        let queue = JobQueue::new(&rt);
        let state = rt.reactive(Object::from([("n", 0)]));
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Bumps `n` once, from inside its own flush, until it reaches 2.
        let writer_state = state.clone();
        let _writer = rt.create_reaction(
            move || {
                let n = writer_state.get("n").and_then(|f| f.as_f64()).unwrap_or(0.0);
                if n == 1.0 {
                    writer_state.set("n", 2);
                }
            },
            ReactionOptions::new().with_scheduler(queue.clone()),
        );

        let reader_state = state.clone();
        let seen_clone = seen.clone();
        let _reader = rt.create_reaction(
            move || {
                let n = reader_state.get("n").and_then(|f| f.as_f64());
                seen_clone.lock().push(n);
            },
            ReactionOptions::new().with_scheduler(queue.clone()),
        );

        state.set("n", 1);
        // First flush: writer sets n = 2, which queues reader into a second
        // flush; reader still runs in the first one too.
        assert_eq!(rt.run_microtasks().unwrap(), 2);

        assert_eq!(*seen.lock(), vec![Some(0.0), Some(2.0), Some(2.0)]);
    }
}
