//! Input-action handlers. The only code that mutates replicated state.

use concord_core::{Handle, StreamReader, WireResult};

use super::EntitySystem;
use crate::entity::Echo;
use crate::entity_data::{EntityData, Lifecycle};
use crate::extension::{ControlRequest, ExtensionContext};
use crate::pool::BindPriority;
use crate::protocol::{
    decode_destroy, CreateAction, EntityRef, ExtensionMethodAction, TransformChangeAction,
};
use crate::transform::{ChannelValue, TransformChange, TransformChannel};
use crate::transport::{ActionChannel, InputAction};

impl EntitySystem {
    /// Applies one delivered action. Malformed actions are logged and
    /// dropped; every replica drops them identically.
    pub(super) fn handle_action(&mut self, action: &InputAction) {
        self.session_started = true;
        let result = match action.channel {
            ActionChannel::Create => self.on_create(action),
            ActionChannel::Destroy => self.on_destroy(action),
            ActionChannel::DestroyAll => {
                self.on_destroy_all();
                Ok(())
            }
            ActionChannel::TransformChange => self.on_transform_change(action),
            ActionChannel::ExtensionMethod => self.on_extension_method(action),
        };
        if let Err(error) = result {
            tracing::warn!(
                channel = ?action.channel,
                player_id = action.player_id,
                unique_id = action.unique_id,
                %error,
                "malformed action dropped"
            );
        }
    }

    /// Live record addressed by an action.
    pub(super) fn resolve(&self, target: EntityRef) -> Option<Handle<EntityData>> {
        let handle = match target {
            EntityRef::Id(id) => self.by_id.get(&id),
            EntityRef::Unique(unique_id) => self.by_unique.get(&unique_id),
        }
        .copied()?;
        self.records
            .get(handle)
            .filter(|data| data.accepts_actions())
            .map(|_| handle)
    }

    fn on_create(&mut self, action: &InputAction) -> WireResult<()> {
        let create = CreateAction::decode(&action.payload)?;
        let Some(proto) = self.prototypes.get(create.prototype_id) else {
            tracing::warn!(prototype_id = create.prototype_id, "create: unknown prototype");
            return Ok(());
        };

        let provisional = if action.player_id == self.transport.local_player_id() {
            self.by_unique.get(&action.unique_id).copied().filter(|&handle| {
                self.records
                    .get(handle)
                    .is_some_and(|data| data.lifecycle == Lifecycle::Provisional)
            })
        } else {
            None
        };
        let handle = provisional.unwrap_or_else(|| {
            let transform = proto.default_transform(create.position, create.rotation);
            self.records
                .insert(EntityData::from_prototype(proto, &self.extensions, transform))
        });

        let id = self.allocate_id();
        if let Some(data) = self.records.get_mut(handle) {
            data.id = id;
            data.unique_id = action.unique_id;
            data.created_by = action.player_id;
            data.last_user = action.player_id;
        }
        self.by_unique.insert(action.unique_id, handle);
        self.register_live(handle);
        if provisional.is_none() && self.config.auto_activate {
            self.request_bind(handle, BindPriority::Normal);
        }
        tracing::debug!(
            entity_id = id,
            prototype_id = create.prototype_id,
            player_id = action.player_id,
            "created"
        );
        Ok(())
    }

    fn on_destroy(&mut self, action: &InputAction) -> WireResult<()> {
        let target = decode_destroy(&action.payload)?;
        match self.resolve(target) {
            Some(handle) => self.destroy_record(handle),
            None => tracing::debug!(?target, "destroy: target already gone"),
        }
        Ok(())
    }

    fn on_destroy_all(&mut self) {
        while let Some(&handle) = self.live.last() {
            self.destroy_record(handle);
        }
        tracing::debug!("destroyed all");
    }

    fn on_transform_change(&mut self, action: &InputAction) -> WireResult<()> {
        let change = TransformChangeAction::decode(&action.payload)?;
        let Some(handle) = self.resolve(change.target) else {
            tracing::debug!(target = ?change.target, "transform change: target gone");
            return Ok(());
        };
        let local = action.player_id == self.transport.local_player_id();
        let interpolation = self.config.interpolation_duration;
        let Some(data) = self.records.get_mut(handle) else {
            return Ok(());
        };

        let mut applied = TransformChange::NONE;
        for channel in TransformChannel::ALL {
            let Some(value) = change.values[channel.index()] else {
                continue;
            };
            if data.set_channel(value) {
                applied |= TransformChange::changed(channel);
                if change.change.is_discontinuous(channel) {
                    applied |= TransformChange::discontinuous(channel);
                }
            }
        }
        data.last_user = action.player_id;

        if let Some(entity) = data.entity.and_then(|entity| self.entities.get_mut(entity)) {
            let echo = if local {
                entity.confirm_echo(action.unique_id)
            } else {
                Echo::Unexpected
            };
            match echo {
                // Already shown when edited
                Echo::Pending => {}
                // Changes from others applied in between may have moved the display
                Echo::Confirmed => entity.reconcile(data, interpolation),
                Echo::Unexpected => entity.show_authoritative(data, applied, interpolation),
            }
        }
        Ok(())
    }

    fn on_extension_method(&mut self, action: &InputAction) -> WireResult<()> {
        let method = ExtensionMethodAction::decode(&action.payload)?;
        let Some(handle) = self.resolve(method.target) else {
            tracing::debug!(target = ?method.target, "extension method: target gone");
            return Ok(());
        };
        let interpolation = self.config.interpolation_duration;
        let Some(data) = self.records.get_mut(handle) else {
            return Ok(());
        };

        let slot = method.extension_index;
        let Some(declared) = self
            .prototypes
            .get(data.prototype_id)
            .and_then(|proto| proto.extensions.get(slot))
        else {
            tracing::warn!(entity_id = data.id, slot, "extension method: no such slot");
            return Ok(());
        };
        let method_count = self
            .extensions
            .methods(&declared.type_name)
            .map_or(0, <[_]>::len);
        if usize::from(method.method) >= method_count {
            tracing::warn!(
                entity_id = data.id,
                type_name = declared.type_name.as_str(),
                method = method.method,
                "extension method: unknown method index"
            );
            return Ok(());
        }

        let mut ctx = ExtensionContext::new(slot, action.player_id);
        let mut reader = StreamReader::new(method.payload);
        let outcome = data.extensions[slot].invoke(method.method, &mut reader, &mut ctx);

        let mut released: Vec<(ChannelValue, f32)> = Vec::new();
        if outcome.is_ok() {
            for request in ctx.into_requests() {
                match request {
                    ControlRequest::Take(channel) => {
                        let _displaced = data.take_control_of(channel, slot);
                    }
                    ControlRequest::GiveBack {
                        value,
                        interpolation,
                    } => {
                        if data.give_back_control_of(value, Some(slot)) {
                            released.push((value, interpolation));
                        }
                    }
                }
            }
        }
        data.last_user = action.player_id;

        if let Some(entity) = data.entity.and_then(|entity| self.entities.get_mut(entity)) {
            for index in 0..data.extension_count() {
                entity.refresh_extension(index, data);
            }
            entity.show_owned_channels(data, interpolation);
            for (value, duration) in released {
                entity.show_released(value, duration);
            }
        }
        outcome
    }
}
