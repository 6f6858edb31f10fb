//! # Entity
//!
//! The optional, non-authoritative representation of a live record: visual
//! transform, behavior extensions, and local-only timers. Never serialized.
//!
//! ## Visual Smoothing
//!
//! Authoritative changes blend in over the interpolation duration; changes
//! flagged discontinuous snap. Local edits show immediately and are sent
//! later as one coalesced transform-change action.

use concord_core::{Handle, Quat, Transform, Vec3};

use crate::entity_data::EntityData;
use crate::extension::{Extension, ExtensionRegistry};
use crate::ownership::{ChannelControl, GiveBack};
use crate::prototype::Prototype;
use crate::transform::{ChannelOwner, ChannelValue, TransformChange, TransformChannel};

/// How an applied transform change relates to this replica's own sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Echo {
    /// An earlier send; a later one is still in flight.
    Pending,
    /// The last send; nothing of ours is in flight anymore.
    Confirmed,
    /// Not a send this representation is waiting for.
    Unexpected,
}

#[derive(Clone, Copy, Debug)]
struct Tween {
    from: ChannelValue,
    to: ChannelValue,
    elapsed: f32,
    duration: f32,
}

impl Tween {
    fn sample(&self) -> ChannelValue {
        let t = (self.elapsed / self.duration).clamp(0.0, 1.0);
        self.from.interpolate(self.to, t)
    }

    fn finished(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Instantiated, pooled representation bound to at most one record.
pub struct Entity {
    prototype_id: u32,
    data: Option<Handle<EntityData>>,
    behaviors: Vec<Box<dyn Extension>>,
    visual: Transform,
    tweens: [Option<Tween>; 3],
    latency: ChannelControl,
    outgoing: TransformChange,
    outgoing_values: Transform,
    flush_timer: f32,
    pending_echo: Option<u64>,
    active: bool,
}

impl Entity {
    /// Instantiates an unbound representation of `prototype`.
    pub(crate) fn instantiate(prototype: &Prototype, registry: &ExtensionRegistry) -> Self {
        let visual = prototype.default_transform(Vec3::ZERO, Quat::IDENTITY);
        Self {
            prototype_id: prototype.id,
            data: None,
            behaviors: prototype
                .extensions
                .iter()
                .map(|ext| registry.create_behavior(&ext.type_name))
                .collect(),
            visual,
            tweens: [None; 3],
            latency: ChannelControl::new(),
            outgoing: TransformChange::NONE,
            outgoing_values: visual,
            flush_timer: 0.0,
            pending_echo: None,
            active: false,
        }
    }

    /// Prototype this representation was instantiated from.
    #[must_use]
    pub const fn prototype_id(&self) -> u32 {
        self.prototype_id
    }

    /// Bound record.
    #[must_use]
    pub const fn data(&self) -> Option<Handle<EntityData>> {
        self.data
    }

    /// Returns true while bound and shown.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Number of behavior slots.
    #[must_use]
    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    /// Typed behavior of a slot.
    #[must_use]
    pub fn behavior<T: Extension>(&self, slot: usize) -> Option<&T> {
        self.behaviors.get(slot)?.as_any().downcast_ref::<T>()
    }

    /// Mutable typed behavior of a slot.
    pub fn behavior_mut<T: Extension>(&mut self, slot: usize) -> Option<&mut T> {
        self.behaviors.get_mut(slot)?.as_any_mut().downcast_mut::<T>()
    }

    /// Latency-side owner of a channel.
    #[must_use]
    pub const fn latency_owner(&self, channel: TransformChannel) -> ChannelOwner {
        self.latency.owner(channel)
    }

    /// What is shown this frame.
    ///
    /// Channels under latency control come from their behavior; the rest
    /// come from the smoothed visual state.
    #[must_use]
    pub fn visual_transform(&self) -> Transform {
        let mut transform = self.visual;
        for channel in TransformChannel::ALL {
            if let Some(value) = self
                .latency
                .owner_slot(channel)
                .and_then(|slot| self.behaviors.get(slot))
                .and_then(|behavior| behavior.visual_value(channel))
            {
                value.apply_to(&mut transform);
            }
        }
        transform
    }

    /// Returns true while local edits wait to be sent.
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Binds to `data`, restoring visual state from the record.
    pub(crate) fn bind(&mut self, handle: Handle<EntityData>, data: &EntityData) {
        self.data = Some(handle);
        self.active = true;
        self.visual = data.effective_transform();
        self.outgoing_values = self.visual;
        self.tweens = [None; 3];
        for (behavior, ext) in self.behaviors.iter_mut().zip(&data.extensions) {
            behavior.refresh(ext.as_ref());
        }
    }

    /// Detaches and restores prototype defaults before returning to the pool.
    pub(crate) fn reset_to_default(&mut self, prototype: &Prototype) {
        self.data = None;
        self.active = false;
        self.visual = prototype.default_transform(Vec3::ZERO, Quat::IDENTITY);
        self.outgoing_values = self.visual;
        self.tweens = [None; 3];
        self.latency.reset();
        self.outgoing = TransformChange::NONE;
        self.flush_timer = 0.0;
        self.pending_echo = None;
        for behavior in &mut self.behaviors {
            behavior.reset();
        }
    }

    /// Re-derives one behavior from its data.
    pub(crate) fn refresh_extension(&mut self, slot: usize, data: &EntityData) {
        if let (Some(behavior), Some(ext)) = (self.behaviors.get_mut(slot), data.extensions.get(slot)) {
            behavior.refresh(ext.as_ref());
        }
    }

    fn show(&mut self, value: ChannelValue, interpolation: f32) {
        let channel = value.channel();
        let current = ChannelValue::of(&self.visual, channel);
        if interpolation <= 0.0 || current == value {
            value.apply_to(&mut self.visual);
            self.tweens[channel.index()] = None;
        } else {
            self.tweens[channel.index()] = Some(Tween {
                from: current,
                to: value,
                elapsed: 0.0,
                duration: interpolation,
            });
        }
    }

    /// Shows an applied authoritative change.
    pub(crate) fn show_authoritative(
        &mut self,
        data: &EntityData,
        change: TransformChange,
        interpolation: f32,
    ) {
        let target = data.effective_transform();
        for channel in TransformChannel::ALL {
            if !change.has(channel) || self.latency.owner_slot(channel).is_some() {
                continue;
            }
            let duration = if change.is_discontinuous(channel) {
                0.0
            } else {
                interpolation
            };
            self.show(ChannelValue::of(&target, channel), duration);
        }
    }

    /// Blends every extension-owned channel towards its owner's value.
    pub(crate) fn show_owned_channels(&mut self, data: &EntityData, interpolation: f32) {
        let target = data.effective_transform();
        for channel in TransformChannel::ALL {
            if data.control.owner_slot(channel).is_some() && self.latency.owner_slot(channel).is_none() {
                self.show(ChannelValue::of(&target, channel), interpolation);
            }
        }
    }

    /// Returned channel: blend to the released value.
    pub(crate) fn show_released(&mut self, value: ChannelValue, interpolation: f32) {
        if self.latency.owner_slot(value.channel()).is_none() {
            self.show(value, interpolation);
        }
    }

    /// Applies a local edit immediately and queues it for sending.
    pub(crate) fn edit(&mut self, value: ChannelValue, discontinuous: bool, flush_interval: f32) {
        let channel = value.channel();
        if self.outgoing.is_empty() {
            self.flush_timer = flush_interval;
        }
        self.outgoing |= TransformChange::changed(channel);
        if discontinuous {
            self.outgoing |= TransformChange::discontinuous(channel);
        }
        value.apply_to(&mut self.outgoing_values);
        value.apply_to(&mut self.visual);
        self.tweens[channel.index()] = None;
    }

    /// Counts down the coalescing timer.
    ///
    /// # Returns
    ///
    /// The batched change once the interval elapsed.
    pub(crate) fn tick_flush(&mut self, dt: f32) -> Option<(TransformChange, Transform)> {
        if self.outgoing.is_empty() {
            return None;
        }
        self.flush_timer -= dt;
        if self.flush_timer > 0.0 {
            return None;
        }
        let change = std::mem::take(&mut self.outgoing);
        Some((change, self.outgoing_values))
    }

    /// Records the unique id of the last change sent for this entity.
    pub(crate) fn note_sent(&mut self, unique_id: u64) {
        self.pending_echo = Some(unique_id);
    }

    /// Classifies an applied change sent by this replica.
    pub(crate) fn confirm_echo(&mut self, unique_id: u64) -> Echo {
        match self.pending_echo {
            Some(pending) if unique_id < pending => Echo::Pending,
            Some(pending) if unique_id == pending => {
                self.pending_echo = None;
                Echo::Confirmed
            }
            _ => Echo::Unexpected,
        }
    }

    /// Realigns the display with the record once every sent change is
    /// confirmed. Channels with unsent local edits keep showing them.
    pub(crate) fn reconcile(&mut self, data: &EntityData, interpolation: f32) {
        let target = data.effective_transform();
        for channel in TransformChannel::ALL {
            if self.outgoing.has(channel) || self.latency.owner_slot(channel).is_some() {
                continue;
            }
            let value = ChannelValue::of(&target, channel);
            let heading = self.tweens[channel.index()]
                .map_or_else(|| ChannelValue::of(&self.visual, channel), |tween| tween.to);
            if heading != value {
                self.show(value, interpolation);
            }
        }
    }

    /// Local-only counterpart of the authoritative ownership take.
    pub(crate) fn take_latency_control(&mut self, channel: TransformChannel, slot: usize) -> bool {
        if slot >= self.behaviors.len() {
            return false;
        }
        let _ = self.latency.take(channel, slot);
        self.tweens[channel.index()] = None;
        true
    }

    /// Local-only counterpart of the authoritative give-back.
    pub(crate) fn give_back_latency_control(
        &mut self,
        value: ChannelValue,
        releasing: Option<usize>,
        interpolation: f32,
    ) -> bool {
        let channel = value.channel();
        let shown = self.visual_transform();
        match self.latency.give_back(channel, releasing) {
            GiveBack::Rejected => false,
            GiveBack::Released { .. } => {
                ChannelValue::of(&shown, channel).apply_to(&mut self.visual);
                self.show(value, interpolation);
                true
            }
        }
    }

    /// Advances tweens and behaviors.
    pub(crate) fn advance(&mut self, dt: f32) {
        for tween_slot in &mut self.tweens {
            if let Some(tween) = tween_slot {
                tween.elapsed += dt;
                tween.sample().apply_to(&mut self.visual);
                if tween.finished() {
                    *tween_slot = None;
                }
            }
        }
        for behavior in &mut self.behaviors {
            behavior.advance(dt);
        }
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("prototype_id", &self.prototype_id)
            .field("data", &self.data)
            .field("active", &self.active)
            .field("visual", &self.visual)
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}
