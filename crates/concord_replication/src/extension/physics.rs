//! # Physics Handoff Extension
//!
//! While a body is awake, its simulation owns position and rotation and
//! replicates them through `sync` calls; the generic transform-change
//! protocol is suspended for those channels. Going to sleep hands both
//! channels back with the resting pose.
//!
//! ```text
//! wake  ──→ take(position), take(rotation)
//! sync  ──→ pose update (ignored while asleep)
//! sleep ──→ give_back(position), give_back(rotation)
//! ```

use std::any::Any;

use concord_core::{Quat, StreamReader, StreamWriter, Vec3, WireError, WireResult};

use super::{Extension, ExtensionContext, ExtensionData, ExtensionKind};
use crate::transform::{ChannelValue, TransformChannel};

/// Seconds over which the resting pose blends in after `sleep`.
const SLEEP_SETTLE_SECONDS: f32 = 0.1;

/// Registration record of the built-in physics extension.
#[derive(Debug)]
pub struct PhysicsExtension;

impl PhysicsExtension {
    /// Method index of `wake`.
    pub const WAKE: u16 = 0;
    /// Method index of `sync`.
    pub const SYNC: u16 = 1;
    /// Method index of `sleep`.
    pub const SLEEP: u16 = 2;

    /// Encodes a `wake` or `sync` payload.
    #[must_use]
    pub fn pose_payload(position: Vec3, rotation: Quat, velocity: Vec3) -> Vec<u8> {
        let mut writer = StreamWriter::with_capacity(40);
        writer.write_vec3(position);
        writer.write_quat(rotation);
        writer.write_vec3(velocity);
        writer.into_bytes()
    }

    /// Encodes a `sleep` payload.
    #[must_use]
    pub fn rest_payload(position: Vec3, rotation: Quat) -> Vec<u8> {
        let mut writer = StreamWriter::with_capacity(28);
        writer.write_vec3(position);
        writer.write_quat(rotation);
        writer.into_bytes()
    }
}

impl ExtensionKind for PhysicsExtension {
    const TYPE_NAME: &'static str = "physics";
    const METHODS: &'static [&'static str] = &["wake", "sync", "sleep"];
    type Data = PhysicsData;
    type Behavior = PhysicsBody;
}

/// Replicated body state.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicsData {
    /// Whether the simulation owns the pose.
    pub awake: bool,
    /// Simulated position.
    pub position: Vec3,
    /// Simulated rotation.
    pub rotation: Quat,
    /// Linear velocity.
    pub velocity: Vec3,
}

impl Default for PhysicsData {
    fn default() -> Self {
        Self {
            awake: false,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }
}

impl PhysicsData {
    fn read_pose(&mut self, reader: &mut StreamReader<'_>) -> WireResult<()> {
        self.position = reader.read_vec3()?;
        self.rotation = reader.read_quat()?;
        self.velocity = reader.read_vec3()?;
        Ok(())
    }
}

impl ExtensionData for PhysicsData {
    fn write(&self, writer: &mut StreamWriter) {
        writer.write_bool(self.awake);
        writer.write_vec3(self.position);
        writer.write_quat(self.rotation);
        writer.write_vec3(self.velocity);
    }

    fn read(&mut self, reader: &mut StreamReader<'_>, version: u16) -> WireResult<()> {
        if version != 1 {
            return Err(WireError::InvalidValue {
                field: "physics version",
                value: u64::from(version),
            });
        }
        self.awake = reader.read_bool()?;
        self.read_pose(reader)
    }

    fn invoke(
        &mut self,
        method: u16,
        reader: &mut StreamReader<'_>,
        ctx: &mut ExtensionContext,
    ) -> WireResult<()> {
        match method {
            PhysicsExtension::WAKE => {
                self.read_pose(reader)?;
                self.awake = true;
                ctx.take_control_of(TransformChannel::Position);
                ctx.take_control_of(TransformChannel::Rotation);
            }
            PhysicsExtension::SYNC => {
                if self.awake {
                    self.read_pose(reader)?;
                }
            }
            PhysicsExtension::SLEEP => {
                let position = reader.read_vec3()?;
                let rotation = reader.read_quat()?;
                if self.awake {
                    self.awake = false;
                    self.position = position;
                    self.rotation = rotation;
                    self.velocity = Vec3::ZERO;
                    ctx.give_back_control_of(ChannelValue::Position(position), SLEEP_SETTLE_SECONDS);
                    ctx.give_back_control_of(ChannelValue::Rotation(rotation), SLEEP_SETTLE_SECONDS);
                }
            }
            other => {
                return Err(WireError::InvalidValue {
                    field: "physics method",
                    value: u64::from(other),
                })
            }
        }
        Ok(())
    }

    fn channel_value(&self, channel: TransformChannel) -> Option<ChannelValue> {
        if !self.awake {
            return None;
        }
        match channel {
            TransformChannel::Position => Some(ChannelValue::Position(self.position)),
            TransformChannel::Rotation => Some(ChannelValue::Rotation(self.rotation)),
            TransformChannel::Scale => None,
        }
    }

    fn on_control_lost(&mut self, _channel: TransformChannel) {
        self.awake = false;
        self.velocity = Vec3::ZERO;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Local body: extrapolates the last synced pose between `sync` calls.
#[derive(Clone, Debug, Default)]
pub struct PhysicsBody {
    awake: bool,
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
}

impl PhysicsBody {
    /// Locally extrapolated position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Returns true while the replicated body is awake.
    #[must_use]
    pub const fn is_awake(&self) -> bool {
        self.awake
    }

    /// Applies a local prediction before its action is confirmed.
    pub fn predict(&mut self, position: Vec3, rotation: Quat, velocity: Vec3) {
        self.awake = true;
        self.position = position;
        self.rotation = rotation;
        self.velocity = velocity;
    }
}

impl Extension for PhysicsBody {
    fn refresh(&mut self, data: &dyn ExtensionData) {
        if let Some(data) = data.as_any().downcast_ref::<PhysicsData>() {
            self.awake = data.awake;
            self.position = data.position;
            self.rotation = data.rotation;
            self.velocity = data.velocity;
        }
    }

    fn advance(&mut self, dt: f32) {
        if self.awake {
            self.position = self.position.add_scaled(self.velocity, dt);
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn visual_value(&self, channel: TransformChannel) -> Option<ChannelValue> {
        if !self.awake {
            return None;
        }
        match channel {
            TransformChannel::Position => Some(ChannelValue::Position(self.position)),
            TransformChannel::Rotation => Some(ChannelValue::Rotation(self.rotation)),
            TransformChannel::Scale => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
