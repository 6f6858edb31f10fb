//! # Concord Replication
//!
//! Deterministic lockstep entity replication.
//!
//! Every replica owns an [`EntitySystem`]. Local calls such as
//! [`EntitySystem::create`] are sent as input actions through a
//! [`LockstepTransport`]; the transport delivers every action to every
//! replica in one global order, and only the applied actions mutate
//! replicated state. Replicas that apply the same actions hold
//! byte-identical state, which [`SerializeOperation`] can prove.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ EntitySystem        ids, live array, action handlers         │
//! ├──────────────────────────┬───────────────────────────────────┤
//! │ EntityData (replicated)  │ Entity (local, pooled, optional)  │
//! │ transform, ownership,    │ visual smoothing, behaviors,      │
//! │ extension data           │ latency hiding                    │
//! ├──────────────────────────┴───────────────────────────────────┤
//! │ concord_core: wire codec, arenas, frame budget               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let hub = LockstepHub::new();
//! let prototypes = PrototypeRegistry::new(vec![Prototype::new(1, "crate")])?;
//! let mut system = EntitySystem::new(
//!     ReplicationConfig::default(),
//!     prototypes,
//!     ExtensionRegistry::with_builtin(),
//!     hub.connect(1),
//! )?;
//!
//! let handle = system.create(1, Vec3::ZERO, Quat::IDENTITY);
//! system.update(1.0 / 60.0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod entity;
pub mod entity_data;
pub mod error;
pub mod extension;
pub mod ownership;
pub mod placement;
pub mod pool;
pub mod protocol;
pub mod prototype;
pub mod system;
pub mod transform;
pub mod transport;

pub use config::ReplicationConfig;
pub use entity::Entity;
pub use entity_data::{EntityData, ImportedMetadata, Lifecycle};
pub use error::{ReplicationError, ReplicationResult};
pub use extension::{
    ControlRequest, Extension, ExtensionContext, ExtensionData, ExtensionKind, ExtensionRegistry,
    NullBehavior, OpaqueExtensionData, PhysicsBody, PhysicsData, PhysicsExtension,
};
pub use ownership::{ChannelControl, GiveBack};
pub use placement::{ExtensionPayload, Placement};
pub use pool::{BindPriority, EntityPool, PoolStats};
pub use protocol::{CreateAction, EntityRef, ExtensionMethodAction, TransformChangeAction};
pub use prototype::{Prototype, PrototypeExtension, PrototypeRegistry};
pub use system::{
    DeserializeOperation, EntitySystem, ExportOperation, ImportOperation, ImportReport,
    ImportedExtension, ImportedPrototype, SerializeOperation, EXPORT_FORMAT_VERSION,
};
pub use transform::{ChannelOwner, ChannelValue, NoSyncFlags, TransformChange, TransformChannel};
pub use transport::{ActionChannel, HubEndpoint, InputAction, LockstepHub, LockstepTransport};

pub use concord_core::{FrameBudget, Handle, Progress, Quat, Transform, Vec3};
