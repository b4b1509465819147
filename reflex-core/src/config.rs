//! Runtime Configuration
//!
//! Every field has a default, so a configuration document only needs to name
//! the settings it changes:
//!
//! ```rust
//! use reflex_core::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{ "warn_on_readonly": false }"#).unwrap();
//! assert!(!config.warn_on_readonly);
//! assert_eq!(config.max_microtasks_per_drain, 100_000);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on tasks executed by one `run_microtasks` call.
    ///
    /// A reaction that reschedules itself on every flush would otherwise
    /// keep the drain going forever.
    pub max_microtasks_per_drain: usize,

    /// Emit a `tracing` warning when a read-only wrapper rejects a write.
    pub warn_on_readonly: bool,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_microtasks_per_drain: 100_000,
            warn_on_readonly: true,
        }
    }
}
