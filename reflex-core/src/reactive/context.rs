//! Reactive Context
//!
//! The execution context tracks which reaction is currently running.
//! This enables automatic dependency tracking: when a wrapped object is read,
//! the runtime can register the current reaction as a subscriber.
//!
//! # Implementation
//!
//! Each runtime keeps one stack per thread. Running a reaction pushes it onto
//! the calling thread's stack; the returned guard pops it when dropped, so
//! the previously active reaction is restored after nested runs and even if
//! the body panics.
//!
//! Reactions running at the same time on different threads therefore never
//! see each other as active, and each thread's reads are recorded against
//! its own reaction.
//!
//! An entry may also be empty: [`Runtime::untracked`] pushes `None` to
//! suspend tracking for a closure without disturbing the outer reaction.
//!
//! [`Runtime::untracked`]: super::Runtime::untracked

use std::thread::{self, ThreadId};

use dashmap::DashMap;

use super::reaction::{ReactionId, ReactionRef};

/// Stacks of active reactions for one runtime, keyed by thread.
#[derive(Default)]
pub(crate) struct ExecutionContext {
    stacks: DashMap<ThreadId, Vec<Option<ReactionRef>>>,
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `reaction` the active reaction until the guard is dropped.
    pub(crate) fn enter(&self, reaction: Option<ReactionRef>) -> ContextGuard<'_> {
        let id = reaction.as_ref().map(ReactionRef::id);
        let thread = thread::current().id();
        self.stacks.entry(thread).or_default().push(reaction);
        ContextGuard {
            context: self,
            thread,
            id,
        }
    }

    /// The reaction on top of the calling thread's stack, if any.
    pub(crate) fn active(&self) -> Option<ReactionRef> {
        self.stacks
            .get(&thread::current().id())
            .and_then(|stack| stack.last().cloned().flatten())
    }

    /// Number of entries on the calling thread's stack.
    pub(crate) fn depth(&self) -> usize {
        self.stacks
            .get(&thread::current().id())
            .map_or(0, |stack| stack.len())
    }

    fn pop(&self, thread: ThreadId) -> Option<Option<ReactionRef>> {
        let (popped, empty) = {
            let mut stack = self.stacks.get_mut(&thread)?;
            let popped = stack.pop();
            (popped, stack.is_empty())
        };
        if empty {
            self.stacks.remove_if(&thread, |_, stack| stack.is_empty());
        }
        popped
    }
}

/// Guard that pops the context when dropped.
pub(crate) struct ContextGuard<'a> {
    context: &'a ExecutionContext,

    /// The thread whose stack was pushed.
    thread: ThreadId,

    id: Option<ReactionId>,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.context.pop(self.thread);

        // Verify we're popping the right context.
        if let Some(entry) = popped {
            let popped_id = entry.as_ref().map(ReactionRef::id);
            debug_assert_eq!(
                popped_id, self.id,
                "execution context mismatch: expected {:?}, got {:?}",
                self.id, popped_id
            );
        }
    }
}
