//! Reflex Core
//!
//! This crate provides a fine-grained reactive engine for dynamic object
//! graphs. It implements:
//!
//! - Wrapped objects whose reads are tracked and whose writes notify
//! - Reactions with automatic dependency tracking and custom schedulers
//! - Cached derived values
//! - Watchers with old/new values and deferred flushing
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the dynamic value model (`Value`, `Object`, `Key`)
//! - `reactive`: the runtime, wrappers, reactions, derived values, watchers
//! - `config`: runtime configuration
//! - `error`: error types
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use reflex_core::{Object, Runtime};
//!
//! let rt = Runtime::new();
//! let count = rt.reactive(Object::from([("count", 0)]));
//!
//! // Create a derived value
//! let reader = count.clone();
//! let doubled = rt.derive(move || {
//!     reader.get("count").and_then(|f| f.as_f64()).unwrap_or(0.0) * 2.0
//! });
//!
//! // Create a reaction
//! let runs = Arc::new(AtomicUsize::new(0));
//! let runs_clone = runs.clone();
//! let doubled_clone = doubled.clone();
//! rt.effect(move || {
//!     doubled_clone.value();
//!     runs_clone.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! // Update the state; the reaction re-runs on its own
//! count.set("count", 5);
//! assert_eq!(doubled.value(), 10.0);
//! assert_eq!(runs.load(Ordering::SeqCst), 2);
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use reactive::{
    Derived, Field, Flush, Mode, Reaction, ReactionOptions, ReactionRef, Reactive, Runtime,
    WatchOptions, WatchSource, Watcher,
};
pub use value::{Key, Object, ObjectId, Value};
