//! # Extension Contract
//!
//! Extensions attach typed features to entities as two paired components:
//!
//! ```text
//! EntityData (replicated)          Entity (local, optional)
//! ┌───────────────────────┐        ┌────────────────────────┐
//! │ extensions[0]: Data A │ ─────→ │ behaviors[0]: Behavior A│
//! │ extensions[1]: Data B │ ─────→ │ behaviors[1]: Behavior B│
//! └───────────────────────┘        └────────────────────────┘
//! ```
//!
//! The data half owns serialization and is mutated only by ordered input
//! actions. The behavior half derives its state from the data half and is
//! never replicated. Both arrays are index-aligned with the prototype's
//! extension list.
//!
//! Extensions are registered statically through [`ExtensionKind`]; dispatch
//! goes through the method table declared there, never through reflection.

mod physics;
mod registry;

pub use physics::{PhysicsBody, PhysicsData, PhysicsExtension};
pub use registry::{ExtensionRegistry, NullBehavior, OpaqueExtensionData};

use std::any::Any;
use std::fmt;

use concord_core::{StreamReader, StreamWriter, WireResult};

use crate::transform::{ChannelValue, TransformChannel};

/// Ownership request raised by an extension while handling a method.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlRequest {
    /// Take exclusive control of a channel.
    Take(TransformChannel),
    /// Return a channel to generic sync with `value`.
    GiveBack {
        /// Value the channel resumes from.
        value: ChannelValue,
        /// Seconds over which the visual settles on `value`.
        interpolation: f32,
    },
}

/// Deterministic context of one extension method invocation.
#[derive(Debug)]
pub struct ExtensionContext {
    slot: usize,
    player_id: u32,
    requests: Vec<ControlRequest>,
}

impl ExtensionContext {
    pub(crate) const fn new(slot: usize, player_id: u32) -> Self {
        Self {
            slot,
            player_id,
            requests: Vec::new(),
        }
    }

    /// Slot of the invoked extension.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Player whose action is being applied.
    #[must_use]
    pub const fn player_id(&self) -> u32 {
        self.player_id
    }

    /// Requests exclusive control of `channel` for this extension.
    pub fn take_control_of(&mut self, channel: TransformChannel) {
        self.requests.push(ControlRequest::Take(channel));
    }

    /// Requests that a channel owned by this extension return to generic sync.
    pub fn give_back_control_of(&mut self, value: ChannelValue, interpolation: f32) {
        self.requests.push(ControlRequest::GiveBack {
            value,
            interpolation,
        });
    }

    pub(crate) fn into_requests(self) -> Vec<ControlRequest> {
        self.requests
    }
}

/// Replicated half of an extension.
///
/// Every method must be deterministic: replicas applying the same actions
/// must end up with identical bytes from [`write`](Self::write).
pub trait ExtensionData: Any + fmt::Debug {
    /// Payload format version written before each payload.
    fn version(&self) -> u16 {
        1
    }

    /// Encodes the full state.
    fn write(&self, writer: &mut StreamWriter);

    /// Decodes a state written with `version`.
    ///
    /// # Errors
    ///
    /// Returns a wire error on truncated or invalid payloads.
    fn read(&mut self, reader: &mut StreamReader<'_>, version: u16) -> WireResult<()>;

    /// Applies a dispatched method.
    ///
    /// # Errors
    ///
    /// Returns a wire error on malformed method payloads.
    fn invoke(
        &mut self,
        method: u16,
        reader: &mut StreamReader<'_>,
        ctx: &mut ExtensionContext,
    ) -> WireResult<()> {
        let _ = (method, reader, ctx);
        Ok(())
    }

    /// Current value of a channel this extension owns.
    fn channel_value(&self, channel: TransformChannel) -> Option<ChannelValue> {
        let _ = channel;
        None
    }

    /// Called when another controller displaced or forcibly released this one.
    fn on_control_lost(&mut self, channel: TransformChannel) {
        let _ = channel;
    }

    /// Called once when the owning entity is destroyed.
    fn release(&mut self) {}

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Local half of an extension.
pub trait Extension: Any {
    /// Derives local state from the replicated half. Called on bind and
    /// after every change to the data.
    fn refresh(&mut self, data: &dyn ExtensionData);

    /// Advances local-only state.
    fn advance(&mut self, dt: f32) {
        let _ = dt;
    }

    /// Clears local state before the entity returns to the pool.
    fn reset(&mut self) {}

    /// Visual value of a channel this behavior drives locally.
    fn visual_value(&self, channel: TransformChannel) -> Option<ChannelValue> {
        let _ = channel;
        None
    }

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Static registration record pairing a data type with its behavior.
///
/// # Example
///
/// ```rust,ignore
/// struct Health;
///
/// impl ExtensionKind for Health {
///     const TYPE_NAME: &'static str = "health";
///     const METHODS: &'static [&'static str] = &["damage"];
///     type Data = HealthData;
///     type Behavior = HealthBar;
/// }
///
/// let mut registry = ExtensionRegistry::new();
/// registry.register::<Health>();
/// ```
pub trait ExtensionKind: 'static {
    /// Unique type name used by prototypes and export streams.
    const TYPE_NAME: &'static str;
    /// Dispatchable method names; the index is the wire method index.
    const METHODS: &'static [&'static str] = &[];
    /// Replicated half.
    type Data: ExtensionData + Default;
    /// Local half.
    type Behavior: Extension + Default;
}
