//! # Entity System
//!
//! The orchestrator. Owns every record and representation, allocates ids,
//! encodes outgoing actions and applies delivered ones.
//!
//! ## Control Flow
//!
//! ```text
//! create()/destroy()/set_position()/invoke_extension()
//!     │  optimistic local effect, tagged with the unique id
//!     ▼
//! LockstepTransport::send ──→ (global order) ──→ poll() on every replica
//!                                                    │
//!                                   update() → handle_action()
//!                                                    │
//!                                  EntityData mutates here and only here
//! ```
//!
//! ## Frame Loop
//!
//! ```rust,ignore
//! loop {
//!     system.update(dt);
//!     if let Some(op) = &mut import {
//!         if op.step(&mut system, &mut system.config().frame_budget()).is_done() {
//!             import = None;
//!         }
//!     }
//! }
//! ```

mod export;
mod handlers;
mod import;
mod serialize;

pub use export::{ExportOperation, EXPORT_FORMAT_VERSION};
pub use import::{ImportOperation, ImportReport, ImportedExtension, ImportedPrototype};
pub use serialize::{DeserializeOperation, SerializeOperation};

use std::collections::HashMap;

use concord_core::{Arena, Handle, Quat, StreamReader, Transform, Vec3};

use crate::config::ReplicationConfig;
use crate::entity::Entity;
use crate::entity_data::{EntityData, Lifecycle, PendingLinks};
use crate::error::{ReplicationError, ReplicationResult};
use crate::extension::ExtensionRegistry;
use crate::placement::Placement;
use crate::pool::{BindPriority, EntityPool};
use crate::prototype::PrototypeRegistry;
use crate::protocol::{
    encode_destroy, CreateAction, EntityRef, ExtensionMethodAction, TransformChangeAction,
};
use crate::transform::{ChannelValue, TransformChange, TransformChannel};
use crate::transport::{ActionChannel, LockstepTransport};

/// Replicated entity registry and action protocol of one replica.
pub struct EntitySystem {
    config: ReplicationConfig,
    prototypes: PrototypeRegistry,
    extensions: ExtensionRegistry,
    transport: Box<dyn LockstepTransport>,
    records: Arena<EntityData>,
    entities: Arena<Entity>,
    live: Vec<Handle<EntityData>>,
    by_id: HashMap<u32, Handle<EntityData>>,
    by_unique: HashMap<u64, Handle<EntityData>>,
    next_id: u32,
    highest_pre_instantiated_id: u32,
    /// `None` marks a placeholder lost outside the system.
    placeholders: HashMap<u32, Option<Entity>>,
    pool: EntityPool,
    session_started: bool,
}

impl EntitySystem {
    /// Wires a replica from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::UnknownExtensionType`] if a prototype
    /// names an unregistered extension type and opaque extensions are not
    /// allowed.
    pub fn new(
        config: ReplicationConfig,
        prototypes: PrototypeRegistry,
        extensions: ExtensionRegistry,
        transport: impl LockstepTransport + 'static,
    ) -> ReplicationResult<Self> {
        for proto in prototypes.iter() {
            for ext in &proto.extensions {
                if extensions.contains(&ext.type_name) {
                    continue;
                }
                if !config.allow_opaque_extensions {
                    return Err(ReplicationError::UnknownExtensionType {
                        prototype: proto.name.clone(),
                        type_name: ext.type_name.clone(),
                    });
                }
                tracing::warn!(
                    prototype_id = proto.id,
                    type_name = ext.type_name.as_str(),
                    "extension type not registered; data is carried opaquely"
                );
            }
        }

        Ok(Self {
            config,
            prototypes,
            extensions,
            transport: Box::new(transport),
            records: Arena::with_capacity(256),
            entities: Arena::with_capacity(256),
            live: Vec::with_capacity(256),
            by_id: HashMap::new(),
            by_unique: HashMap::new(),
            next_id: 1,
            highest_pre_instantiated_id: 0,
            placeholders: HashMap::new(),
            pool: EntityPool::new(),
            session_started: false,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Prototype catalog.
    #[must_use]
    pub const fn prototypes(&self) -> &PrototypeRegistry {
        &self.prototypes
    }

    /// Extension registration table.
    #[must_use]
    pub const fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Player id of this replica.
    #[must_use]
    pub fn local_player_id(&self) -> u32 {
        self.transport.local_player_id()
    }

    /// Record behind a handle, if it still exists.
    #[must_use]
    pub fn get(&self, handle: Handle<EntityData>) -> Option<&EntityData> {
        self.records.get(handle)
    }

    /// Bound representation of a record.
    #[must_use]
    pub fn entity(&self, handle: Handle<EntityData>) -> Option<&Entity> {
        self.entities.get(self.records.get(handle)?.entity?)
    }

    /// Mutable bound representation of a record.
    pub fn entity_mut(&mut self, handle: Handle<EntityData>) -> Option<&mut Entity> {
        let entity = self.records.get(handle)?.entity?;
        self.entities.get_mut(entity)
    }

    /// Live record with replicated id `id`.
    #[must_use]
    pub fn find_by_id(&self, id: u32) -> Option<Handle<EntityData>> {
        self.by_id.get(&id).copied()
    }

    /// Record created by the action with `unique_id`.
    #[must_use]
    pub fn find_by_unique_id(&self, unique_id: u64) -> Option<Handle<EntityData>> {
        self.by_unique.get(&unique_id).copied()
    }

    /// Dense live array in replication order.
    #[must_use]
    pub fn live(&self) -> &[Handle<EntityData>] {
        &self.live
    }

    /// Number of live records.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Live records in replication order.
    pub fn live_records(&self) -> impl Iterator<Item = &EntityData> {
        self.live.iter().filter_map(|&handle| self.records.get(handle))
    }

    /// Number of bound representations.
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.entities.len()
    }

    /// Id the next confirmed create receives.
    #[must_use]
    pub const fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Upper bound of the reserved placement id range.
    #[must_use]
    pub const fn highest_pre_instantiated_id(&self) -> u32 {
        self.highest_pre_instantiated_id
    }

    /// Representation pool.
    #[must_use]
    pub const fn pool(&self) -> &EntityPool {
        &self.pool
    }

    // =========================================================================
    // Outgoing actions
    // =========================================================================

    fn entity_ref(&self, handle: Handle<EntityData>) -> Option<EntityRef> {
        let data = self.records.get(handle)?;
        if data.pending_destroy {
            return None;
        }
        match (data.id, data.unique_id) {
            (0, 0) => None,
            (0, unique_id) => Some(EntityRef::Unique(unique_id)),
            (id, _) => Some(EntityRef::Id(id)),
        }
    }

    /// Spawns an entity of `prototype_id`.
    ///
    /// A provisional record exists immediately and is bound with high
    /// priority; it receives its id when the action is applied.
    pub fn create(
        &mut self,
        prototype_id: u32,
        position: Vec3,
        rotation: Quat,
    ) -> Option<Handle<EntityData>> {
        let Some(proto) = self.prototypes.get(prototype_id) else {
            tracing::warn!(prototype_id, "create: unknown prototype");
            return None;
        };
        let payload = CreateAction {
            prototype_id,
            position,
            rotation,
        }
        .encode();
        let unique_id = self.transport.send(ActionChannel::Create, payload);

        let mut data = EntityData::from_prototype(
            proto,
            &self.extensions,
            proto.default_transform(position, rotation),
        );
        data.unique_id = unique_id;
        data.wants_active = self.config.auto_activate;
        let handle = self.records.insert(data);
        self.by_unique.insert(unique_id, handle);
        if self.config.auto_activate {
            self.pool.request(handle, BindPriority::High);
        }
        tracing::debug!(prototype_id, unique_id, "create sent");
        Some(handle)
    }

    /// Destroys an entity. Its representation returns to the pool at once;
    /// the record goes away when the action is applied.
    pub fn destroy(&mut self, handle: Handle<EntityData>) -> bool {
        let Some(target) = self.entity_ref(handle) else {
            return false;
        };
        let unique_id = self
            .transport
            .send(ActionChannel::Destroy, encode_destroy(target));
        self.hide_locally(handle);
        tracing::debug!(?target, unique_id, "destroy sent");
        true
    }

    /// Destroys every entity, back to front, when applied.
    pub fn destroy_all(&mut self) {
        let _unique_id = self.transport.send(ActionChannel::DestroyAll, Vec::new());
        let handles: Vec<Handle<EntityData>> = self.records.iter().map(|(handle, _)| handle).collect();
        for handle in handles {
            self.hide_locally(handle);
        }
    }

    fn hide_locally(&mut self, handle: Handle<EntityData>) {
        if let Some(data) = self.records.get_mut(handle) {
            data.pending_destroy = true;
            data.wants_active = false;
        }
        self.unbind(handle);
    }

    /// Sends the channels of `transform` flagged in `change`.
    ///
    /// Channels currently owned by an extension are dropped from the action.
    pub fn send_transform_change(
        &mut self,
        handle: Handle<EntityData>,
        change: TransformChange,
        transform: &Transform,
    ) -> Option<u64> {
        let target = self.entity_ref(handle)?;
        let no_sync = self.records.get(handle)?.no_sync();
        let payload = TransformChangeAction::encode(target, change, transform, no_sync);
        Some(self.transport.send(ActionChannel::TransformChange, payload))
    }

    fn edit(&mut self, handle: Handle<EntityData>, value: ChannelValue, discontinuous: bool) -> bool {
        let Some(data) = self.records.get(handle) else {
            return false;
        };
        if data.pending_destroy || data.no_sync().contains(value.channel()) {
            return false;
        }
        let interval = self.config.transform_flush_interval;
        if let Some(entity) = data.entity.and_then(|entity| self.entities.get_mut(entity)) {
            entity.edit(value, discontinuous, interval);
            return true;
        }

        let mut transform = data.transform;
        value.apply_to(&mut transform);
        let mut change = TransformChange::changed(value.channel());
        if discontinuous {
            change |= TransformChange::discontinuous(value.channel());
        }
        self.send_transform_change(handle, change, &transform).is_some()
    }

    /// Moves an entity; shown at once, sent coalesced.
    pub fn set_position(&mut self, handle: Handle<EntityData>, position: Vec3) -> bool {
        self.edit(handle, ChannelValue::Position(position), false)
    }

    /// Rotates an entity; shown at once, sent coalesced.
    pub fn set_rotation(&mut self, handle: Handle<EntityData>, rotation: Quat) -> bool {
        self.edit(handle, ChannelValue::Rotation(rotation), false)
    }

    /// Scales an entity; shown at once, sent coalesced.
    pub fn set_scale(&mut self, handle: Handle<EntityData>, scale: Vec3) -> bool {
        self.edit(handle, ChannelValue::Scale(scale), false)
    }

    /// Moves an entity without interpolation on other replicas.
    pub fn teleport(&mut self, handle: Handle<EntityData>, position: Vec3) -> bool {
        self.edit(handle, ChannelValue::Position(position), true)
    }

    /// Dispatches `method` of the extension in `slot`.
    pub fn invoke_extension(
        &mut self,
        handle: Handle<EntityData>,
        slot: usize,
        method: u16,
        payload: &[u8],
    ) -> Option<u64> {
        let target = self.entity_ref(handle)?;
        if slot >= self.records.get(handle)?.extension_count() {
            tracing::warn!(?target, slot, "invoke_extension: no such extension slot");
            return None;
        }
        let encoded = ExtensionMethodAction::encode(target, slot, method, payload);
        Some(self.transport.send(ActionChannel::ExtensionMethod, encoded))
    }

    /// Dispatches a method by its declared name.
    pub fn invoke_extension_by_name(
        &mut self,
        handle: Handle<EntityData>,
        slot: usize,
        method: &str,
        payload: &[u8],
    ) -> Option<u64> {
        let prototype_id = self.records.get(handle)?.prototype_id;
        let type_name = &self.prototypes.get(prototype_id)?.extensions.get(slot)?.type_name;
        let Some(index) = self.extensions.method_index(type_name, method) else {
            tracing::warn!(type_name = type_name.as_str(), method, "unknown extension method");
            return None;
        };
        self.invoke_extension(handle, slot, index, payload)
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Gives `channel` to the extension in `slot`.
    ///
    /// Mutates replicated state: call only from code every replica runs in
    /// the same order, such as an extension method.
    pub fn take_control_of(
        &mut self,
        handle: Handle<EntityData>,
        channel: TransformChannel,
        slot: usize,
    ) -> bool {
        let Some(data) = self.records.get_mut(handle) else {
            return false;
        };
        if slot >= data.extension_count() {
            return false;
        }
        let _displaced = data.take_control_of(channel, slot);
        if let Some(entity) = data.entity.and_then(|entity| self.entities.get_mut(entity)) {
            for index in 0..data.extension_count() {
                entity.refresh_extension(index, data);
            }
            entity.show_owned_channels(data, self.config.interpolation_duration);
        }
        true
    }

    /// Returns a channel to generic sync at `value`.
    ///
    /// `releasing` must be the owning slot, or `None` to force. Same
    /// determinism rule as [`take_control_of`](Self::take_control_of).
    pub fn give_back_control_of(
        &mut self,
        handle: Handle<EntityData>,
        value: ChannelValue,
        releasing: Option<usize>,
        interpolation: f32,
    ) -> bool {
        let Some(data) = self.records.get_mut(handle) else {
            return false;
        };
        if !data.give_back_control_of(value, releasing) {
            return false;
        }
        if let Some(entity) = data.entity.and_then(|entity| self.entities.get_mut(entity)) {
            for index in 0..data.extension_count() {
                entity.refresh_extension(index, data);
            }
            entity.show_released(value, interpolation);
        }
        true
    }

    /// Lets the behavior in `slot` drive `channel` visually before the
    /// authoritative handoff is applied.
    pub fn take_latency_control(
        &mut self,
        handle: Handle<EntityData>,
        channel: TransformChannel,
        slot: usize,
    ) -> bool {
        self.entity_mut(handle)
            .is_some_and(|entity| entity.take_latency_control(channel, slot))
    }

    /// Ends local latency control of a channel, blending to `value`.
    pub fn give_back_latency_control(
        &mut self,
        handle: Handle<EntityData>,
        value: ChannelValue,
        releasing: Option<usize>,
        interpolation: f32,
    ) -> bool {
        self.entity_mut(handle).is_some_and(|entity| {
            entity.give_back_latency_control(value, releasing, interpolation)
        })
    }

    // =========================================================================
    // Activation & pooling
    // =========================================================================

    /// Binds or unbinds the representation of a record.
    ///
    /// An unbound record keeps its last known transform.
    pub fn set_active(&mut self, handle: Handle<EntityData>, active: bool) -> bool {
        let Some(data) = self.records.get_mut(handle) else {
            return false;
        };
        if data.pending_destroy {
            return false;
        }
        data.wants_active = active;
        if active {
            if data.entity.is_none() {
                self.pool.request(handle, BindPriority::Normal);
            }
        } else {
            self.unbind(handle);
        }
        true
    }

    /// Instantiates representations ahead of time.
    pub fn prewarm(&mut self, prototype_id: u32, count: usize) -> bool {
        let Some(proto) = self.prototypes.get(prototype_id) else {
            return false;
        };
        self.pool.prewarm(proto, &self.extensions, count);
        true
    }

    pub(crate) fn request_bind(&mut self, handle: Handle<EntityData>, priority: BindPriority) {
        if let Some(data) = self.records.get_mut(handle) {
            if data.entity.is_none() && !data.pending_destroy {
                data.wants_active = true;
                self.pool.request(handle, priority);
            }
        }
    }

    pub(crate) fn unbind(&mut self, handle: Handle<EntityData>) {
        let Some(entity_handle) = self.records.get_mut(handle).and_then(|data| data.entity.take()) else {
            return;
        };
        if let Some(entity) = self.entities.remove(entity_handle) {
            if let Some(proto) = self.prototypes.get(entity.prototype_id()) {
                self.pool.return_entity(entity, proto);
            }
        }
    }

    /// Re-derives the bound representation after a bulk overwrite.
    pub(crate) fn rebind(&mut self, handle: Handle<EntityData>) {
        let Some(data) = self.records.get(handle) else {
            return;
        };
        if let Some(entity) = data.entity.and_then(|entity| self.entities.get_mut(entity)) {
            entity.bind(handle, data);
            return;
        }
        let wants_active = self.config.auto_activate || data.wants_active;
        if wants_active {
            self.request_bind(handle, BindPriority::Normal);
        }
    }

    fn take_placeholder(&mut self, id: u32) -> Option<Entity> {
        match self.placeholders.remove(&id) {
            Some(Some(entity)) => Some(entity),
            Some(None) => {
                tracing::error!(entity_id = id, "placeholder lost; instantiating a replacement");
                None
            }
            None => None,
        }
    }

    fn process_binds(&mut self) {
        let mut bound = 0;
        while bound < self.config.binds_per_frame {
            let Some(handle) = self.pool.next_request() else {
                break;
            };
            let Some(data) = self.records.get(handle) else {
                self.pool.record_stale();
                continue;
            };
            if data.entity.is_some() || data.pending_destroy || !data.wants_active {
                self.pool.record_stale();
                continue;
            }
            let (id, prototype_id, pre_instantiated) = (data.id, data.prototype_id, data.pre_instantiated);
            let placeholder = if pre_instantiated {
                self.take_placeholder(id)
            } else {
                None
            };
            let Some(proto) = self.prototypes.get(prototype_id) else {
                self.pool.record_stale();
                continue;
            };
            let mut entity = match placeholder {
                Some(entity) => entity,
                None => self.pool.acquire(proto, &self.extensions),
            };

            let Some(data) = self.records.get_mut(handle) else {
                continue;
            };
            entity.bind(handle, data);
            data.entity = Some(self.entities.insert(entity));
            bound += 1;
            tracing::debug!(entity_id = id, "bound");
        }
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Applies delivered actions, flushes coalesced transform changes,
    /// advances visuals and processes bind requests.
    pub fn update(&mut self, dt: f32) {
        while let Some(action) = self.transport.poll() {
            self.handle_action(&action);
        }
        self.flush_transform_changes(dt);
        for (_, entity) in self.entities.iter_mut() {
            entity.advance(dt);
        }
        self.process_binds();
    }

    fn flush_transform_changes(&mut self, dt: f32) {
        let ready: Vec<_> = self
            .entities
            .iter_mut()
            .filter_map(|(entity_handle, entity)| {
                let data = entity.data()?;
                let (change, values) = entity.tick_flush(dt)?;
                Some((entity_handle, data, change, values))
            })
            .collect();

        for (entity_handle, data, change, values) in ready {
            if let Some(unique_id) = self.send_transform_change(data, change, &values) {
                if let Some(entity) = self.entities.get_mut(entity_handle) {
                    entity.note_sent(unique_id);
                }
            }
        }
    }

    // =========================================================================
    // Pre-instantiated placements
    // =========================================================================

    /// Registers the scene's placements. Must run before any action.
    ///
    /// # Errors
    ///
    /// Fails if the session already started, on id 0 or repeated ids,
    /// unknown prototypes or parents, or undecodable extension payloads.
    /// Nothing is registered on failure.
    pub fn register_pre_instantiated(&mut self, mut placements: Vec<Placement>) -> ReplicationResult<()> {
        if self.session_started {
            return Err(ReplicationError::SessionAlreadyStarted);
        }
        placements.sort_by_key(|placement| placement.id);

        let mut staged = Vec::with_capacity(placements.len());
        for (index, placement) in placements.iter().enumerate() {
            let duplicate = index > 0 && placements[index - 1].id == placement.id;
            if placement.id == 0 || duplicate || self.by_id.contains_key(&placement.id) {
                return Err(ReplicationError::InvalidPlacement(placement.id));
            }
            let proto = self
                .prototypes
                .get(placement.prototype_id)
                .ok_or(ReplicationError::UnknownPrototype(placement.prototype_id))?;
            let parent_known = placements.iter().any(|other| other.id == placement.parent)
                || self.by_id.contains_key(&placement.parent);
            if placement.parent != 0 && !parent_known {
                return Err(ReplicationError::InvalidPlacement(placement.parent));
            }

            let mut data = EntityData::from_prototype(proto, &self.extensions, placement.transform);
            data.id = placement.id;
            data.hidden = placement.hidden;
            data.pre_instantiated = true;
            for payload in &placement.extensions {
                let Some(ext) = data.extensions.get_mut(payload.slot) else {
                    return Err(ReplicationError::InvalidPlacement(placement.id));
                };
                ext.read(&mut StreamReader::new(&payload.bytes), payload.version)?;
            }
            staged.push(data);
        }

        for data in staged {
            let id = data.id;
            let handle = self.records.insert(data);
            self.register_live(handle);
            self.highest_pre_instantiated_id = self.highest_pre_instantiated_id.max(id);
        }
        for placement in &placements {
            if placement.has_placeholder {
                if let Some(proto) = self.prototypes.get(placement.prototype_id) {
                    let entity = Entity::instantiate(proto, &self.extensions);
                    self.placeholders.insert(placement.id, Some(entity));
                }
            }
            if let (Some(child), Some(parent)) =
                (self.find_by_id(placement.id), self.find_by_id(placement.parent))
            {
                self.link(child, parent);
            }
            if self.config.auto_activate {
                if let Some(handle) = self.find_by_id(placement.id) {
                    self.request_bind(handle, BindPriority::Normal);
                }
            }
        }
        self.next_id = self.next_id.max(self.highest_pre_instantiated_id + 1);
        tracing::debug!(
            count = placements.len(),
            highest = self.highest_pre_instantiated_id,
            "placements registered"
        );
        Ok(())
    }

    /// Drops the scene object of a placement, as if lost externally.
    ///
    /// Binding that placement later logs an error and instantiates a
    /// replacement.
    pub fn discard_placeholder(&mut self, id: u32) -> bool {
        self.placeholders
            .get_mut(&id)
            .is_some_and(|slot| slot.take().is_some())
    }

    // =========================================================================
    // Registry bookkeeping
    // =========================================================================

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Appends a record to the live array and id table.
    pub(crate) fn register_live(&mut self, handle: Handle<EntityData>) {
        let Some(data) = self.records.get_mut(handle) else {
            return;
        };
        data.lifecycle = Lifecycle::Live;
        data.instance_index = Some(self.live.len());
        self.by_id.insert(data.id, handle);
        self.live.push(handle);
    }

    /// Creates a live record with an exact id.
    pub(crate) fn insert_with_id(&mut self, id: u32, prototype_id: u32) -> Option<Handle<EntityData>> {
        let proto = self.prototypes.get(prototype_id)?;
        let mut data = EntityData::from_prototype(
            proto,
            &self.extensions,
            proto.default_transform(Vec3::ZERO, Quat::IDENTITY),
        );
        data.id = id;
        let handle = self.records.insert(data);
        self.register_live(handle);
        Some(handle)
    }

    /// Deregisters and releases a record. Unknown handles are ignored.
    pub(crate) fn destroy_record(&mut self, handle: Handle<EntityData>) {
        self.unbind(handle);
        let Some(mut data) = self.records.remove(handle) else {
            return;
        };

        if let Some(index) = data.instance_index {
            if index < self.live.len() && self.live[index] == handle {
                let _ = self.live.swap_remove(index);
                if let Some(&moved) = self.live.get(index) {
                    if let Some(moved) = self.records.get_mut(moved) {
                        moved.instance_index = Some(index);
                    }
                }
            }
        }
        if data.id != 0 && self.by_id.get(&data.id) == Some(&handle) {
            let _ = self.by_id.remove(&data.id);
        }
        if data.unique_id != 0 && self.by_unique.get(&data.unique_id) == Some(&handle) {
            let _ = self.by_unique.remove(&data.unique_id);
        }
        if let Some(parent) = data.parent.and_then(|parent| self.records.get_mut(parent)) {
            parent.children.retain(|&child| child != handle);
        }
        for &child in &data.children {
            if let Some(child) = self.records.get_mut(child) {
                child.parent = None;
            }
        }
        if data.pre_instantiated {
            let _ = self.placeholders.remove(&data.id);
        }
        tracing::debug!(entity_id = data.id, prototype_id = data.prototype_id, "destroyed");
        data.release();
    }

    fn link(&mut self, child: Handle<EntityData>, parent: Handle<EntityData>) {
        if let Some(data) = self.records.get_mut(child) {
            data.parent = Some(parent);
        }
        if let Some(data) = self.records.get_mut(parent) {
            if !data.children.contains(&child) {
                data.children.push(child);
            }
        }
    }

    /// Resolves link ids to handles; `map_id` translates stream ids.
    ///
    /// The child list is replaced, so the stream's child order wins over
    /// back-links pushed by children resolved earlier.
    pub(crate) fn resolve_links(
        &mut self,
        handle: Handle<EntityData>,
        links: &PendingLinks,
        map_id: impl Fn(u32) -> Option<u32>,
    ) {
        let lookup = |id: u32| -> Option<Handle<EntityData>> {
            if id == 0 {
                return None;
            }
            map_id(id).and_then(|id| self.by_id.get(&id).copied())
        };
        let parent = lookup(links.parent);
        let children: Vec<Handle<EntityData>> =
            links.children.iter().filter_map(|&id| lookup(id)).collect();
        if links.parent != 0 && parent.is_none() {
            tracing::warn!(parent_id = links.parent, "parent link unresolved");
        }

        if let Some(data) = self.records.get_mut(handle) {
            data.parent = parent;
            data.children.clone_from(&children);
        }
        if let Some(parent) = parent.and_then(|parent| self.records.get_mut(parent)) {
            if !parent.children.contains(&handle) {
                parent.children.push(handle);
            }
        }
        for child in children {
            if let Some(child) = self.records.get_mut(child) {
                child.parent = Some(handle);
            }
        }
    }

    /// Reorders the live array: `order` first, then any other live records.
    pub(crate) fn reorder_live(&mut self, order: &[Handle<EntityData>]) {
        let mut live: Vec<Handle<EntityData>> = order
            .iter()
            .copied()
            .filter(|&handle| {
                self.records
                    .get(handle)
                    .is_some_and(|data| data.lifecycle == Lifecycle::Live)
            })
            .collect();
        for &handle in &self.live {
            if !live.contains(&handle) {
                live.push(handle);
            }
        }
        for (index, &handle) in live.iter().enumerate() {
            if let Some(data) = self.records.get_mut(handle) {
                data.instance_index = Some(index);
            }
        }
        self.live = live;
    }

    /// Every record that is not a placement, provisional ones included.
    pub(crate) fn runtime_records(&self) -> Vec<Handle<EntityData>> {
        self.records
            .iter()
            .filter(|(_, data)| !data.pre_instantiated)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Every placement record.
    pub(crate) fn pre_instantiated_records(&self) -> Vec<Handle<EntityData>> {
        self.records
            .iter()
            .filter(|(_, data)| data.pre_instantiated)
            .map(|(handle, _)| handle)
            .collect()
    }

    pub(crate) fn set_next_id(&mut self, next_id: u32) {
        self.next_id = next_id.max(self.highest_pre_instantiated_id + 1);
    }

    pub(crate) fn set_highest_pre_instantiated_id(&mut self, id: u32) {
        self.highest_pre_instantiated_id = id;
    }

    pub(crate) fn records_mut(&mut self) -> &mut Arena<EntityData> {
        &mut self.records
    }

    pub(crate) fn link_id(&self, handle: Handle<EntityData>) -> u32 {
        self.records.get(handle).map_or(0, |data| data.id)
    }
}
