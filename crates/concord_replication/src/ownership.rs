//! # Transform Ownership
//!
//! Records which extension slot, if any, replicates each transform channel.
//! Used twice: authoritatively on [`EntityData`](crate::EntityData), and as
//! a latency variant on the bound [`Entity`](crate::Entity) whose visual
//! state may briefly diverge.

use crate::transform::{ChannelOwner, NoSyncFlags, TransformChannel};

/// Outcome of [`ChannelControl::give_back`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GiveBack {
    /// The releaser was not the recorded controller.
    Rejected,
    /// Generic sync was restored.
    Released {
        /// Slot that owned the channel, if any.
        previous: Option<usize>,
    },
}

/// Per-channel owner table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelControl {
    owners: [ChannelOwner; 3],
}

impl ChannelControl {
    /// All channels generic.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owners: [ChannelOwner::Generic; 3],
        }
    }

    /// Current owner of `channel`.
    #[inline]
    #[must_use]
    pub const fn owner(&self, channel: TransformChannel) -> ChannelOwner {
        self.owners[channel.index()]
    }

    /// Slot owning `channel`, if an extension does.
    #[inline]
    #[must_use]
    pub const fn owner_slot(&self, channel: TransformChannel) -> Option<usize> {
        match self.owners[channel.index()] {
            ChannelOwner::Generic => None,
            ChannelOwner::Extension(slot) => Some(slot),
        }
    }

    /// Channels currently excluded from generic sync.
    #[must_use]
    pub fn no_sync(&self) -> NoSyncFlags {
        let mut flags = NoSyncFlags::NONE;
        for channel in TransformChannel::ALL {
            flags.set(channel, self.owner_slot(channel).is_some());
        }
        flags
    }

    /// Gives `channel` to `controller`.
    ///
    /// # Returns
    ///
    /// The displaced extension slot, if a different extension owned it.
    pub fn take(&mut self, channel: TransformChannel, controller: usize) -> Option<usize> {
        let previous = self.owner_slot(channel);
        self.owners[channel.index()] = ChannelOwner::Extension(controller);
        previous.filter(|&slot| slot != controller)
    }

    /// Returns `channel` to generic sync.
    ///
    /// Succeeds only when `releasing` is the recorded controller, or `None`
    /// to force the release.
    pub fn give_back(&mut self, channel: TransformChannel, releasing: Option<usize>) -> GiveBack {
        let previous = self.owner_slot(channel);
        if releasing.is_some() && releasing != previous {
            return GiveBack::Rejected;
        }
        self.owners[channel.index()] = ChannelOwner::Generic;
        GiveBack::Released { previous }
    }

    /// Overwrites the owner of `channel` without any protocol.
    pub fn set_owner(&mut self, channel: TransformChannel, owner: ChannelOwner) {
        self.owners[channel.index()] = owner;
    }

    /// Returns every channel to generic sync.
    pub fn reset(&mut self) {
        self.owners = [ChannelOwner::Generic; 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_reports_displaced_controller() {
        let mut control = ChannelControl::new();
        assert_eq!(control.take(TransformChannel::Position, 0), None);
        assert_eq!(control.take(TransformChannel::Position, 0), None);
        assert_eq!(control.take(TransformChannel::Position, 1), Some(0));
        assert!(control.no_sync().contains(TransformChannel::Position));
        assert!(!control.no_sync().contains(TransformChannel::Rotation));
    }

    #[test]
    fn test_give_back_requires_matching_controller() {
        let mut control = ChannelControl::new();
        let _ = control.take(TransformChannel::Rotation, 2);

        assert_eq!(control.give_back(TransformChannel::Rotation, Some(1)), GiveBack::Rejected);
        assert_eq!(control.owner_slot(TransformChannel::Rotation), Some(2));

        assert_eq!(
            control.give_back(TransformChannel::Rotation, Some(2)),
            GiveBack::Released { previous: Some(2) }
        );
        assert_eq!(control.owner(TransformChannel::Rotation), ChannelOwner::Generic);
    }

    #[test]
    fn test_forced_give_back() {
        let mut control = ChannelControl::new();
        let _ = control.take(TransformChannel::Scale, 3);
        assert_eq!(
            control.give_back(TransformChannel::Scale, None),
            GiveBack::Released { previous: Some(3) }
        );
        assert_eq!(
            control.give_back(TransformChannel::Scale, None),
            GiveBack::Released { previous: None }
        );
    }
}
