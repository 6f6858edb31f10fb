//! # Replication Configuration
//!
//! Loaded from TOML once at startup. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! frame_budget_ms = 4
//! transform_flush_interval = 0.1
//! interpolation_duration = 0.1
//! binds_per_frame = 1
//! auto_activate = true
//! allow_opaque_extensions = false
//! ```

use std::path::Path;

use concord_core::FrameBudget;
use serde::{Deserialize, Serialize};

use crate::error::{ReplicationError, ReplicationResult};

/// Tunables for an [`EntitySystem`](crate::EntitySystem).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Wall-clock budget per frame for resumable bulk operations.
    pub frame_budget_ms: u64,
    /// Seconds during which outgoing transform changes are coalesced.
    pub transform_flush_interval: f32,
    /// Seconds a continuous visual change takes to settle.
    pub interpolation_duration: f32,
    /// Bind requests processed per frame.
    pub binds_per_frame: usize,
    /// Whether new entities request a bind as soon as they exist.
    pub auto_activate: bool,
    /// Accept prototypes naming unregistered extension types; their data is
    /// carried as opaque bytes.
    pub allow_opaque_extensions: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 4,
            transform_flush_interval: 0.1,
            interpolation_duration: 0.1,
            binds_per_frame: 1,
            auto_activate: true,
            allow_opaque_extensions: false,
        }
    }
}

impl ReplicationConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Config`] on malformed TOML.
    pub fn from_toml_str(source: &str) -> ReplicationResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Io`] if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> ReplicationResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ReplicationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Starts this frame's budget for bulk work.
    #[must_use]
    pub fn frame_budget(&self) -> FrameBudget {
        FrameBudget::from_millis(self.frame_budget_ms)
    }
}
