//! Reactive Primitives
//!
//! This module implements the core reactive system: wrapped objects,
//! reactions, derived values and watchers. Together they form Reflex's
//! fine-grained dependency tracking.
//!
//! # Concepts
//!
//! ## Wrapped Objects
//!
//! A [`Reactive`] wraps a plain [`Object`](crate::Object). Reads through the
//! wrapper inside a running reaction register that reaction as a dependent
//! of the key read. Writes through the wrapper notify every dependent of the
//! key written. Nested objects are wrapped lazily on read.
//!
//! ## Reactions
//!
//! A [`Reaction`] is a computation that re-runs whenever the state it read
//! last time changes. Dependencies are rebuilt on every run, so conditional
//! reads never leave stale subscriptions behind.
//!
//! ## Derived Values
//!
//! A [`Derived`] caches the result of a getter and recomputes only when
//! read after one of its sources changed.
//!
//! ## Watchers
//!
//! A [`Watcher`] calls back with new and previous values of a source,
//! synchronously or after the current burst of writes.
//!
//! # Implementation Notes
//!
//! All bookkeeping lives in a [`Runtime`]: the subscription store, the
//! per-thread stacks of running reactions and the microtask queue. Nothing
//! is global, so two runtimes never see each other's reactions.

mod context;
mod derived;
mod queue;
mod reaction;
mod runtime;
mod store;
mod watch;
mod wrapper;

pub use derived::Derived;
pub use queue::JobQueue;
pub use reaction::{Reaction, ReactionId, ReactionOptions, ReactionRef, Scheduler};
pub use runtime::Runtime;
pub use store::{ChangeKind, SubscriptionStore, TrackKey};
pub use watch::{Flush, WatchOptions, WatchSource, Watcher};
pub use wrapper::{Field, Mode, Reactive};
