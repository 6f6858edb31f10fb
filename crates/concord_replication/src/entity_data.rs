//! # Entity Data
//!
//! The authoritative, replicated record of one entity. Game-state-visible
//! fields change only while an ordered input action is applied.
//!
//! ## Body Layout
//!
//! ```text
//! block {
//!   u8        flags        bits 0-2: no-sync per channel, bit 3: hidden
//!   channel*               each channel NOT flagged no-sync
//!   small*    owner slot   each channel flagged no-sync
//!   small     created_by
//!   small     last_user
//!   small     parent id    0 = none
//!   small     child count, small* child ids
//!   small     extension count
//!   block*    { u16 version, payload }
//! }
//! ```
//!
//! Every extension payload is its own block, so an unknown or unmapped
//! extension is skipped without misaligning the rest of the body.

use concord_core::{Handle, StreamReader, StreamWriter, Transform, WireResult};

use crate::entity::Entity;
use crate::extension::{ExtensionData, ExtensionRegistry};
use crate::ownership::{ChannelControl, GiveBack};
use crate::prototype::Prototype;
use crate::transform::{ChannelOwner, ChannelValue, NoSyncFlags, TransformChannel};

const FLAG_HIDDEN: u8 = 1 << 3;

/// Replication state of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created locally, waiting for the authoritative echo. Addressed by
    /// unique id only and absent from snapshots.
    Provisional,
    /// Registered under its id on every replica.
    Live,
}

/// Bookkeeping attached to a record for the duration of an import.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedMetadata {
    /// Id of the entity in the imported stream.
    pub source_id: u32,
    /// Stream extension index → local slot.
    pub extension_remap: Vec<Option<usize>>,
}

/// Ids read from a body, resolved to handles once the batch is complete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingLinks {
    /// Parent id, 0 for none.
    pub parent: u32,
    /// Child ids in order.
    pub children: Vec<u32>,
}

/// Authoritative record of one entity.
#[derive(Debug)]
pub struct EntityData {
    pub(crate) id: u32,
    pub(crate) unique_id: u64,
    pub(crate) instance_index: Option<usize>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) prototype_id: u32,
    pub(crate) transform: Transform,
    pub(crate) control: ChannelControl,
    pub(crate) created_by: u32,
    pub(crate) last_user: u32,
    pub(crate) hidden: bool,
    pub(crate) parent: Option<Handle<EntityData>>,
    pub(crate) children: Vec<Handle<EntityData>>,
    pub(crate) extensions: Vec<Box<dyn ExtensionData>>,
    pub(crate) entity: Option<Handle<Entity>>,
    pub(crate) pending_destroy: bool,
    pub(crate) pre_instantiated: bool,
    pub(crate) wants_active: bool,
    pub(crate) imported_metadata: Option<ImportedMetadata>,
}

impl EntityData {
    /// Default-initialized record of `prototype` at `transform`.
    pub(crate) fn from_prototype(
        prototype: &Prototype,
        registry: &ExtensionRegistry,
        transform: Transform,
    ) -> Self {
        Self {
            id: 0,
            unique_id: 0,
            instance_index: None,
            lifecycle: Lifecycle::Provisional,
            prototype_id: prototype.id,
            transform,
            control: ChannelControl::new(),
            created_by: 0,
            last_user: 0,
            hidden: false,
            parent: None,
            children: Vec::new(),
            extensions: prototype
                .extensions
                .iter()
                .map(|ext| registry.create_data(&ext.type_name))
                .collect(),
            entity: None,
            pending_destroy: false,
            pre_instantiated: false,
            wants_active: false,
            imported_metadata: None,
        }
    }

    /// Replicated id; 0 until the create action is confirmed.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Ephemeral id of the create action; 0 for records that never had one.
    #[inline]
    #[must_use]
    pub const fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// Position in the dense live array.
    #[inline]
    #[must_use]
    pub const fn instance_index(&self) -> Option<usize> {
        self.instance_index
    }

    /// Replication state.
    #[inline]
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Prototype id.
    #[inline]
    #[must_use]
    pub const fn prototype_id(&self) -> u32 {
        self.prototype_id
    }

    /// Generically synced transform. Owned channels hold their reset value.
    #[inline]
    #[must_use]
    pub const fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Transform with owned channels read from their owning extension.
    #[must_use]
    pub fn effective_transform(&self) -> Transform {
        let mut transform = self.transform;
        for channel in TransformChannel::ALL {
            if let Some(value) = self
                .control
                .owner_slot(channel)
                .and_then(|slot| self.extensions.get(slot))
                .and_then(|ext| ext.channel_value(channel))
            {
                value.apply_to(&mut transform);
            }
        }
        transform
    }

    /// Channels excluded from generic sync.
    #[inline]
    #[must_use]
    pub fn no_sync(&self) -> NoSyncFlags {
        self.control.no_sync()
    }

    /// Current owner of `channel`.
    #[inline]
    #[must_use]
    pub const fn owner(&self, channel: TransformChannel) -> ChannelOwner {
        self.control.owner(channel)
    }

    /// Player whose create action produced this record.
    #[must_use]
    pub const fn created_by(&self) -> u32 {
        self.created_by
    }

    /// Player whose action last touched this record.
    #[must_use]
    pub const fn last_user(&self) -> u32 {
        self.last_user
    }

    /// Hidden flag.
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Parent record.
    #[must_use]
    pub const fn parent(&self) -> Option<Handle<EntityData>> {
        self.parent
    }

    /// Child records in order.
    #[must_use]
    pub fn children(&self) -> &[Handle<EntityData>] {
        &self.children
    }

    /// Bound representation, if any.
    #[must_use]
    pub const fn entity(&self) -> Option<Handle<Entity>> {
        self.entity
    }

    /// Returns true if a representation is bound.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.entity.is_some()
    }

    /// Returns true once a local destroy was sent; the record stays until
    /// the action is applied.
    #[must_use]
    pub const fn is_pending_destroy(&self) -> bool {
        self.pending_destroy
    }

    /// Returns true for records placed with the scene.
    #[must_use]
    pub const fn is_pre_instantiated(&self) -> bool {
        self.pre_instantiated
    }

    /// Import bookkeeping, present only while an import runs.
    #[must_use]
    pub const fn imported_metadata(&self) -> Option<&ImportedMetadata> {
        self.imported_metadata.as_ref()
    }

    /// Number of extension slots.
    #[must_use]
    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }

    /// Untyped extension data of a slot.
    #[must_use]
    pub fn extension_data(&self, slot: usize) -> Option<&dyn ExtensionData> {
        self.extensions.get(slot).map(AsRef::as_ref)
    }

    /// Typed extension data of a slot.
    #[must_use]
    pub fn extension<T: ExtensionData>(&self, slot: usize) -> Option<&T> {
        self.extensions.get(slot)?.as_any().downcast_ref::<T>()
    }

    /// Returns true if the record may still be the target of an action.
    pub(crate) fn accepts_actions(&self) -> bool {
        self.lifecycle == Lifecycle::Live
    }

    /// Writes one generic channel. Owned channels are left untouched.
    pub(crate) fn set_channel(&mut self, value: ChannelValue) -> bool {
        if self.control.owner_slot(value.channel()).is_some() {
            return false;
        }
        value.apply_to(&mut self.transform);
        true
    }

    /// Gives `channel` to the extension in `slot`, resetting the generic
    /// value. A displaced extension is notified.
    ///
    /// # Returns
    ///
    /// The displaced slot, if any; `None` as well when `slot` is invalid.
    pub(crate) fn take_control_of(
        &mut self,
        channel: TransformChannel,
        slot: usize,
    ) -> Option<usize> {
        if slot >= self.extensions.len() {
            tracing::warn!(entity_id = self.id, slot, "take_control_of: no such extension slot");
            return None;
        }
        let displaced = self.control.take(channel, slot);
        channel.reset_value().apply_to(&mut self.transform);
        if let Some(previous) = displaced {
            self.extensions[previous].on_control_lost(channel);
        }
        displaced
    }

    /// Returns a channel to generic sync at `value`.
    ///
    /// `releasing` must be the recorded controller, or `None` to force; a
    /// forced release notifies the previous controller.
    pub(crate) fn give_back_control_of(
        &mut self,
        value: ChannelValue,
        releasing: Option<usize>,
    ) -> bool {
        let channel = value.channel();
        match self.control.give_back(channel, releasing) {
            GiveBack::Rejected => false,
            GiveBack::Released { previous } => {
                value.apply_to(&mut self.transform);
                if releasing.is_none() {
                    if let Some(ext) = previous.and_then(|slot| self.extensions.get_mut(slot)) {
                        ext.on_control_lost(channel);
                    }
                }
                true
            }
        }
    }

    /// Releases every extension. Called exactly once on destruction.
    pub(crate) fn release(&mut self) {
        for ext in &mut self.extensions {
            ext.release();
        }
        self.extensions.clear();
        self.instance_index = None;
        self.parent = None;
        self.children.clear();
    }

    /// Encodes the body block.
    pub(crate) fn write_body(&self, writer: &mut StreamWriter, link_id: impl Fn(Handle<Self>) -> u32) {
        let marker = writer.begin_block();

        let no_sync = self.no_sync();
        let mut flags = no_sync.bits();
        if self.hidden {
            flags |= FLAG_HIDDEN;
        }
        writer.write_u8(flags);

        for channel in TransformChannel::ALL {
            if !no_sync.contains(channel) {
                ChannelValue::of(&self.transform, channel).write(writer);
            }
        }
        for channel in TransformChannel::ALL {
            if let Some(slot) = self.control.owner_slot(channel) {
                writer.write_small_uint(slot as u32);
            }
        }

        writer.write_small_uint(self.created_by);
        writer.write_small_uint(self.last_user);
        writer.write_small_uint(self.parent.map_or(0, &link_id));
        writer.write_small_uint(self.children.len() as u32);
        for &child in &self.children {
            writer.write_small_uint(link_id(child));
        }

        writer.write_small_uint(self.extensions.len() as u32);
        for ext in &self.extensions {
            let ext_marker = writer.begin_block();
            writer.write_u16(ext.version());
            ext.write(writer);
            writer.end_block(ext_marker);
        }

        writer.end_block(marker);
    }

    /// Decodes the payload of a body block into this record.
    ///
    /// `remap` maps stream extension indices to local slots; `None` maps
    /// each index to the same slot. Slots the stream does not cover are
    /// reset to their defaults. Callers open the block themselves, so a
    /// corrupt body never misaligns the enclosing stream.
    pub(crate) fn read_body(
        &mut self,
        body: &mut StreamReader<'_>,
        prototype: &Prototype,
        registry: &ExtensionRegistry,
        remap: Option<&[Option<usize>]>,
    ) -> WireResult<BodyOutcome> {
        let flags = body.read_u8()?;
        let no_sync = NoSyncFlags::from_bits(flags);
        self.hidden = flags & FLAG_HIDDEN != 0;

        for channel in TransformChannel::ALL {
            let value = if no_sync.contains(channel) {
                channel.reset_value()
            } else {
                ChannelValue::read(body, channel)?
            };
            value.apply_to(&mut self.transform);
        }
        let mut owners = [None; 3];
        for channel in TransformChannel::ALL {
            if no_sync.contains(channel) {
                owners[channel.index()] = Some(body.read_small_uint()? as usize);
            }
        }

        self.created_by = body.read_small_uint()?;
        self.last_user = body.read_small_uint()?;

        let mut links = PendingLinks {
            parent: body.read_small_uint()?,
            children: Vec::new(),
        };
        let child_count = body.read_small_uint()?;
        for _ in 0..child_count {
            links.children.push(body.read_small_uint()?);
        }

        let map_slot = |index: usize| -> Option<usize> {
            let slot = match remap {
                Some(remap) => remap.get(index).copied().flatten(),
                None => Some(index),
            };
            slot.filter(|&slot| slot < prototype.extensions.len())
        };

        let mut outcome = BodyOutcome {
            links,
            skipped_extensions: 0,
        };
        let mut written = vec![false; prototype.extensions.len()];
        let extension_count = body.read_small_uint()? as usize;
        for index in 0..extension_count {
            let mut payload = body.read_block()?;
            let Some(slot) = map_slot(index) else {
                outcome.skipped_extensions += 1;
                continue;
            };
            let type_name = &prototype.extensions[slot].type_name;
            let mut data = registry.create_data(type_name);
            let decoded = payload
                .read_u16()
                .and_then(|version| data.read(&mut payload, version));
            match decoded {
                Ok(()) => {
                    self.extensions[slot] = data;
                    written[slot] = true;
                }
                Err(error) => {
                    tracing::warn!(
                        entity_id = self.id,
                        slot,
                        type_name = type_name.as_str(),
                        %error,
                        "extension payload rejected; using defaults"
                    );
                    outcome.skipped_extensions += 1;
                }
            }
        }
        for (slot, done) in written.iter().enumerate() {
            if !done {
                self.extensions[slot] = registry.create_data(&prototype.extensions[slot].type_name);
            }
        }

        self.control.reset();
        for channel in TransformChannel::ALL {
            if let Some(source_slot) = owners[channel.index()] {
                match map_slot(source_slot) {
                    Some(slot) => self.control.set_owner(channel, ChannelOwner::Extension(slot)),
                    None => tracing::warn!(
                        entity_id = self.id,
                        ?channel,
                        "owner of channel not present locally; channel returns to generic sync"
                    ),
                }
            }
        }

        Ok(outcome)
    }
}

/// Result of decoding one body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BodyOutcome {
    pub links: PendingLinks,
    pub skipped_extensions: usize,
}
