//! Error types for the reactive engine.

use thiserror::Error;

use crate::value::{Key, ObjectId};

/// Errors and diagnostics produced by the engine.
///
/// Read-only violations are non-fatal: the offending write is dropped and the
/// error is only reported through the runtime's diagnostic channel.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A write or delete was attempted through a read-only wrapper.
    #[error("property `{key}` is read-only")]
    ReadOnly { key: Key },

    /// A microtask drain ran more tasks than the configured limit.
    #[error("microtask drain exceeded {limit} tasks; a job keeps rescheduling itself")]
    MicrotaskLimit { limit: usize },

    /// Installing a prototype would make an object inherit from itself.
    #[error("prototype chain of object {object} would contain itself")]
    PrototypeCycle { object: ObjectId },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReactiveError>;
