//! # Replication Error Types
//!
//! Startup and configuration failures. The input-action path never returns
//! these: a malformed or stale action is logged and ignored on every replica.

use std::path::PathBuf;

use concord_core::WireError;
use thiserror::Error;

/// Errors raised while wiring up a replication session.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A configuration document failed to parse.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Two prototypes share one numeric id.
    #[error("duplicate prototype id: {0}")]
    DuplicatePrototypeId(u32),

    /// Two prototypes share one name.
    #[error("duplicate prototype name: {0}")]
    DuplicatePrototypeName(String),

    /// Prototype id 0 means "none" on the wire.
    #[error("prototype {0} uses reserved id 0")]
    ReservedPrototypeId(String),

    /// A prototype lists an extension type that was never registered.
    #[error("prototype {prototype} references unregistered extension type {type_name}")]
    UnknownExtensionType {
        /// Prototype name.
        prototype: String,
        /// Missing extension type name.
        type_name: String,
    },

    /// Two extensions of one prototype share a local id.
    #[error("prototype {prototype} declares local extension id {local_id} twice")]
    DuplicateLocalExtensionId {
        /// Prototype name.
        prototype: String,
        /// Repeated local id.
        local_id: u32,
    },

    /// A placement references a prototype that does not exist.
    #[error("unknown prototype: {0}")]
    UnknownPrototype(u32),

    /// A pre-instantiated placement is unusable (id 0 or repeated id).
    #[error("invalid pre-instantiated placement id: {0}")]
    InvalidPlacement(u32),

    /// Pre-instantiated placements must be registered before any action runs.
    #[error("session already started; placements can no longer be registered")]
    SessionAlreadyStarted,

    /// A stream failed to decode.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Result type for replication setup.
pub type ReplicationResult<T> = Result<T, ReplicationError>;
