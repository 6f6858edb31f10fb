//! # Transform Channels
//!
//! A transform is three independently replicated channels. Each channel is
//! either synced by the generic transform-change protocol or owned by one
//! extension slot.

use concord_core::{Quat, StreamReader, StreamWriter, Transform, Vec3, WireResult};

/// One independently replicated part of a transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransformChannel {
    /// Position.
    Position = 0,
    /// Rotation.
    Rotation = 1,
    /// Scale.
    Scale = 2,
}

impl TransformChannel {
    /// Every channel in wire order.
    pub const ALL: [Self; 3] = [Self::Position, Self::Rotation, Self::Scale];

    /// Index into per-channel arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask for this channel.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Value a channel is reset to while an extension owns it.
    #[must_use]
    pub const fn reset_value(self) -> ChannelValue {
        match self {
            Self::Position => ChannelValue::Position(Vec3::ZERO),
            Self::Rotation => ChannelValue::Rotation(Quat::IDENTITY),
            Self::Scale => ChannelValue::Scale(Vec3::ONE),
        }
    }
}

/// Per-channel flags marking channels excluded from generic sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NoSyncFlags(u8);

impl NoSyncFlags {
    /// No channel is excluded.
    pub const NONE: Self = Self(0);

    const MASK: u8 = 0b111;

    /// Builds flags from their wire bits; unknown bits are dropped.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Wire bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if `channel` is excluded from generic sync.
    #[inline]
    #[must_use]
    pub const fn contains(self, channel: TransformChannel) -> bool {
        self.0 & channel.bit() != 0
    }

    /// Sets or clears the flag of one channel.
    #[inline]
    pub fn set(&mut self, channel: TransformChannel, no_sync: bool) {
        if no_sync {
            self.0 |= channel.bit();
        } else {
            self.0 &= !channel.bit();
        }
    }
}

/// Who replicates a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelOwner {
    /// The generic transform-change protocol.
    #[default]
    Generic,
    /// The extension in this slot of the entity.
    Extension(usize),
}

/// A value for exactly one channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelValue {
    /// Position value.
    Position(Vec3),
    /// Rotation value.
    Rotation(Quat),
    /// Scale value.
    Scale(Vec3),
}

impl ChannelValue {
    /// The channel this value belongs to.
    #[must_use]
    pub const fn channel(self) -> TransformChannel {
        match self {
            Self::Position(_) => TransformChannel::Position,
            Self::Rotation(_) => TransformChannel::Rotation,
            Self::Scale(_) => TransformChannel::Scale,
        }
    }

    /// Reads one channel out of a transform.
    #[must_use]
    pub const fn of(transform: &Transform, channel: TransformChannel) -> Self {
        match channel {
            TransformChannel::Position => Self::Position(transform.position),
            TransformChannel::Rotation => Self::Rotation(transform.rotation),
            TransformChannel::Scale => Self::Scale(transform.scale),
        }
    }

    /// Writes this value into its channel of `transform`.
    pub fn apply_to(self, transform: &mut Transform) {
        match self {
            Self::Position(value) => transform.position = value,
            Self::Rotation(value) => transform.rotation = value,
            Self::Scale(value) => transform.scale = value,
        }
    }

    /// Interpolates towards `to`. Values of different channels snap to `to`.
    #[must_use]
    pub fn interpolate(self, to: Self, t: f32) -> Self {
        match (self, to) {
            (Self::Position(a), Self::Position(b)) => Self::Position(a.lerp(b, t)),
            (Self::Rotation(a), Self::Rotation(b)) => Self::Rotation(a.nlerp(b, t)),
            (Self::Scale(a), Self::Scale(b)) => Self::Scale(a.lerp(b, t)),
            (_, to) => to,
        }
    }

    /// Encodes the raw channel value (no channel tag).
    pub fn write(self, writer: &mut StreamWriter) {
        match self {
            Self::Position(value) | Self::Scale(value) => writer.write_vec3(value),
            Self::Rotation(value) => writer.write_quat(value),
        }
    }

    /// Decodes a raw value of `channel`.
    pub fn read(reader: &mut StreamReader<'_>, channel: TransformChannel) -> WireResult<Self> {
        Ok(match channel {
            TransformChannel::Position => Self::Position(reader.read_vec3()?),
            TransformChannel::Rotation => Self::Rotation(reader.read_quat()?),
            TransformChannel::Scale => Self::Scale(reader.read_vec3()?),
        })
    }
}

/// Flag byte of a transform-change action.
///
/// ```text
/// bit 0: position    bit 1: position is discontinuous
/// bit 2: rotation    bit 3: rotation is discontinuous
/// bit 4: scale       bit 5: scale is discontinuous
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TransformChange(u8);

impl TransformChange {
    /// Nothing changed.
    pub const NONE: Self = Self(0);
    /// Position changed.
    pub const POSITION: Self = Self(1);
    /// Position jumped; do not interpolate.
    pub const POSITION_DISCONTINUOUS: Self = Self(1 << 1);
    /// Rotation changed.
    pub const ROTATION: Self = Self(1 << 2);
    /// Rotation jumped; do not interpolate.
    pub const ROTATION_DISCONTINUOUS: Self = Self(1 << 3);
    /// Scale changed.
    pub const SCALE: Self = Self(1 << 4);
    /// Scale jumped; do not interpolate.
    pub const SCALE_DISCONTINUOUS: Self = Self(1 << 5);

    const MASK: u8 = 0b11_1111;

    /// Builds a change from its wire byte; unknown bits are dropped.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Wire byte.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Change flag of one channel.
    #[must_use]
    pub const fn changed(channel: TransformChannel) -> Self {
        Self(1 << (2 * channel as u8))
    }

    /// Discontinuity flag of one channel.
    #[must_use]
    pub const fn discontinuous(channel: TransformChannel) -> Self {
        Self(1 << (2 * channel as u8 + 1))
    }

    /// Returns true if nothing changed.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Returns true if `channel` changed.
    #[inline]
    #[must_use]
    pub const fn has(self, channel: TransformChannel) -> bool {
        self.contains(Self::changed(channel))
    }

    /// Returns true if `channel` jumped.
    #[inline]
    #[must_use]
    pub const fn is_discontinuous(self, channel: TransformChannel) -> bool {
        self.contains(Self::discontinuous(channel))
    }

    /// Removes both flags of `channel`.
    pub fn clear_channel(&mut self, channel: TransformChannel) {
        self.0 &= !(Self::changed(channel).0 | Self::discontinuous(channel).0);
    }
}

impl std::ops::BitOr for TransformChange {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for TransformChange {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_flags_per_channel() {
        assert_eq!(TransformChange::changed(TransformChannel::Rotation), TransformChange::ROTATION);
        assert_eq!(
            TransformChange::discontinuous(TransformChannel::Scale),
            TransformChange::SCALE_DISCONTINUOUS
        );

        let mut change = TransformChange::POSITION | TransformChange::POSITION_DISCONTINUOUS;
        assert!(change.is_discontinuous(TransformChannel::Position));
        change.clear_channel(TransformChannel::Position);
        assert!(change.is_empty());
    }

    #[test]
    fn test_no_sync_flags() {
        let mut flags = NoSyncFlags::NONE;
        flags.set(TransformChannel::Scale, true);
        assert!(flags.contains(TransformChannel::Scale));
        assert!(!flags.contains(TransformChannel::Position));
        assert_eq!(NoSyncFlags::from_bits(0xFF).bits(), 0b111);
    }

    #[test]
    fn test_channel_value_apply() {
        let mut transform = Transform::IDENTITY;
        ChannelValue::Position(Vec3::new(5.0, 0.0, 0.0)).apply_to(&mut transform);
        assert_eq!(
            ChannelValue::of(&transform, TransformChannel::Position),
            ChannelValue::Position(Vec3::new(5.0, 0.0, 0.0))
        );
    }
}
