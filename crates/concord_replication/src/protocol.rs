//! # Input-Action Payloads
//!
//! | Action             | Payload                                                |
//! |--------------------|--------------------------------------------------------|
//! | Create             | small prototypeId, vec3 position, quat rotation        |
//! | Destroy            | entityRef                                              |
//! | Destroy-all        | (none)                                                 |
//! | Transform-change   | entityRef, u8 flags, position? rotation? scale?        |
//! | Extension dispatch | entityRef, small extension, small method, payload      |
//!
//! An entityRef is the small-uint id once assigned, otherwise the `0xFF`
//! sentinel followed by the u64 unique id of the create action.

use concord_core::{
    Quat, StreamReader, StreamWriter, Transform, Vec3, WireError, WireResult, SMALL_UINT_SENTINEL,
};

use crate::transform::{ChannelValue, NoSyncFlags, TransformChange, TransformChannel};

/// Reference to an entity inside an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// Replicated id.
    Id(u32),
    /// Unique id of the create action, before the id is known.
    Unique(u64),
}

impl EntityRef {
    /// Encodes the reference.
    pub fn write(self, writer: &mut StreamWriter) {
        match self {
            Self::Id(id) => writer.write_small_uint(id),
            Self::Unique(unique_id) => {
                writer.write_u8(SMALL_UINT_SENTINEL);
                writer.write_u64(unique_id);
            }
        }
    }

    /// Decodes a reference.
    ///
    /// # Errors
    ///
    /// Fails on truncated input.
    pub fn read(reader: &mut StreamReader<'_>) -> WireResult<Self> {
        if reader.peek_u8() == Some(SMALL_UINT_SENTINEL) {
            let _sentinel = reader.read_u8()?;
            return Ok(Self::Unique(reader.read_u64()?));
        }
        Ok(Self::Id(reader.read_small_uint()?))
    }
}

/// Spawn request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CreateAction {
    /// Prototype to spawn.
    pub prototype_id: u32,
    /// Initial position.
    pub position: Vec3,
    /// Initial rotation.
    pub rotation: Quat,
}

impl CreateAction {
    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = StreamWriter::with_capacity(32);
        writer.write_small_uint(self.prototype_id);
        writer.write_vec3(self.position);
        writer.write_quat(self.rotation);
        writer.into_bytes()
    }

    /// Decodes a payload.
    ///
    /// # Errors
    ///
    /// Fails on truncated input.
    pub fn decode(payload: &[u8]) -> WireResult<Self> {
        let mut reader = StreamReader::new(payload);
        Ok(Self {
            prototype_id: reader.read_small_uint()?,
            position: reader.read_vec3()?,
            rotation: reader.read_quat()?,
        })
    }
}

/// Encodes a destroy payload.
#[must_use]
pub fn encode_destroy(target: EntityRef) -> Vec<u8> {
    let mut writer = StreamWriter::with_capacity(9);
    target.write(&mut writer);
    writer.into_bytes()
}

/// Decodes a destroy payload.
///
/// # Errors
///
/// Fails on truncated input.
pub fn decode_destroy(payload: &[u8]) -> WireResult<EntityRef> {
    EntityRef::read(&mut StreamReader::new(payload))
}

/// Generic transform sync.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformChangeAction {
    /// Target entity.
    pub target: EntityRef,
    /// Changed channels as sent.
    pub change: TransformChange,
    /// Values of changed channels, indexed by channel.
    pub values: [Option<ChannelValue>; 3],
}

impl TransformChangeAction {
    /// Encodes the channels of `transform` flagged in `change`.
    ///
    /// Channels in `no_sync` are dropped along with their flags, so the
    /// payload only ever carries generically synced channels.
    #[must_use]
    pub fn encode(
        target: EntityRef,
        mut change: TransformChange,
        transform: &Transform,
        no_sync: NoSyncFlags,
    ) -> Vec<u8> {
        for channel in TransformChannel::ALL {
            if no_sync.contains(channel) {
                change.clear_channel(channel);
            }
        }

        let mut writer = StreamWriter::with_capacity(48);
        target.write(&mut writer);
        writer.write_u8(change.bits());
        for channel in TransformChannel::ALL {
            if change.has(channel) {
                ChannelValue::of(transform, channel).write(&mut writer);
            }
        }
        writer.into_bytes()
    }

    /// Decodes every flagged channel.
    ///
    /// # Errors
    ///
    /// Fails on truncated input.
    pub fn decode(payload: &[u8]) -> WireResult<Self> {
        let mut reader = StreamReader::new(payload);
        let target = EntityRef::read(&mut reader)?;
        let change = TransformChange::from_bits(reader.read_u8()?);
        let mut values = [None; 3];
        for channel in TransformChannel::ALL {
            if change.has(channel) {
                values[channel.index()] = Some(ChannelValue::read(&mut reader, channel)?);
            }
        }
        Ok(Self {
            target,
            change,
            values,
        })
    }
}

/// Extension method dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtensionMethodAction<'a> {
    /// Target entity.
    pub target: EntityRef,
    /// Extension slot.
    pub extension_index: usize,
    /// Index into the extension's method table.
    pub method: u16,
    /// Method payload.
    pub payload: &'a [u8],
}

impl<'a> ExtensionMethodAction<'a> {
    /// Encodes the payload.
    #[must_use]
    pub fn encode(target: EntityRef, extension_index: usize, method: u16, payload: &[u8]) -> Vec<u8> {
        let mut writer = StreamWriter::with_capacity(16 + payload.len());
        target.write(&mut writer);
        writer.write_small_uint(extension_index as u32);
        writer.write_small_uint(u32::from(method));
        writer.write_bytes(payload);
        writer.into_bytes()
    }

    /// Decodes a payload; the method payload borrows from `payload`.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or a method index beyond `u16`.
    pub fn decode(payload: &'a [u8]) -> WireResult<Self> {
        let mut reader = StreamReader::new(payload);
        let target = EntityRef::read(&mut reader)?;
        let extension_index = reader.read_small_uint()? as usize;
        let raw_method = reader.read_small_uint()?;
        let method = u16::try_from(raw_method).map_err(|_| WireError::InvalidValue {
            field: "method index",
            value: u64::from(raw_method),
        })?;
        Ok(Self {
            target,
            extension_index,
            method,
            payload: reader.read_rest(),
        })
    }
}
