//! # Lockstep Transport
//!
//! The ordering layer is external: it delivers every input action to every
//! replica, the sender included, in one global order, tagged with the
//! sending player and a monotonic unique id.
//!
//! [`LockstepHub`] is an in-process implementation used by tests, benches
//! and single-process hosts:
//!
//! ```text
//! HubEndpoint(1) ──send──┐                ┌──→ HubEndpoint(1).poll()
//!                        ├─→ [Mutex: seq] ├──→ HubEndpoint(2).poll()
//! HubEndpoint(2) ──send──┘                └──→ HubEndpoint(3).poll()
//! ```

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Handler channel an action is delivered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionChannel {
    /// Spawn from a prototype.
    Create = 0,
    /// Destroy one entity.
    Destroy = 1,
    /// Destroy every live entity.
    DestroyAll = 2,
    /// Generic transform sync.
    TransformChange = 3,
    /// Extension method dispatch.
    ExtensionMethod = 4,
}

impl ActionChannel {
    /// Decodes a channel byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Create),
            1 => Some(Self::Destroy),
            2 => Some(Self::DestroyAll),
            3 => Some(Self::TransformChange),
            4 => Some(Self::ExtensionMethod),
            _ => None,
        }
    }
}

/// One ordered, replayable mutation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputAction {
    /// Handler channel.
    pub channel: ActionChannel,
    /// Sending player.
    pub player_id: u32,
    /// Monotonic id assigned at send time.
    pub unique_id: u64,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

/// Ordered delivery of input actions.
pub trait LockstepTransport {
    /// Player id of this replica.
    fn local_player_id(&self) -> u32;

    /// Submits an action.
    ///
    /// # Returns
    ///
    /// The unique id the action will carry when delivered.
    fn send(&mut self, channel: ActionChannel, payload: Vec<u8>) -> u64;

    /// Next delivered action, in global order.
    fn poll(&mut self) -> Option<InputAction>;
}

#[derive(Debug, Default)]
struct HubInner {
    next_unique_id: u64,
    endpoints: Vec<Sender<InputAction>>,
}

/// In-process ordering hub.
#[derive(Clone, Debug, Default)]
pub struct LockstepHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LockstepHub {
    /// Creates a hub without endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a replica. It receives every action sent from now on.
    #[must_use]
    pub fn connect(&self, player_id: u32) -> HubEndpoint {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.inner.lock().endpoints.push(sender);
        HubEndpoint {
            player_id,
            hub: Arc::clone(&self.inner),
            receiver,
        }
    }

    /// Number of unique ids handed out so far.
    #[must_use]
    pub fn actions_sent(&self) -> u64 {
        self.inner.lock().next_unique_id
    }
}

/// One replica's connection to a [`LockstepHub`].
#[derive(Debug)]
pub struct HubEndpoint {
    player_id: u32,
    hub: Arc<Mutex<HubInner>>,
    receiver: Receiver<InputAction>,
}

impl HubEndpoint {
    /// Actions delivered but not yet polled.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }
}

impl LockstepTransport for HubEndpoint {
    fn local_player_id(&self) -> u32 {
        self.player_id
    }

    fn send(&mut self, channel: ActionChannel, payload: Vec<u8>) -> u64 {
        // Sequencing and fan-out under one lock keep a single global order
        let mut hub = self.hub.lock();
        hub.next_unique_id += 1;
        let unique_id = hub.next_unique_id;
        let action = InputAction {
            channel,
            player_id: self.player_id,
            unique_id,
            payload,
        };
        hub.endpoints
            .retain(|endpoint| endpoint.send(action.clone()).is_ok());
        unique_id
    }

    fn poll(&mut self) -> Option<InputAction> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_endpoint_sees_one_order() {
        let hub = LockstepHub::new();
        let mut a = hub.connect(1);
        let mut b = hub.connect(2);

        let first = a.send(ActionChannel::Create, vec![1]);
        let second = b.send(ActionChannel::Destroy, vec![2]);
        assert!(second > first);

        for endpoint in [&mut a, &mut b] {
            let x = endpoint.poll().unwrap();
            let y = endpoint.poll().unwrap();
            assert_eq!((x.player_id, x.unique_id), (1, first));
            assert_eq!((y.player_id, y.unique_id), (2, second));
            assert!(endpoint.poll().is_none());
        }
        assert_eq!(hub.actions_sent(), 2);
    }

    #[test]
    fn test_late_endpoint_sees_only_new_actions() {
        let hub = LockstepHub::new();
        let mut a = hub.connect(1);
        let _ = a.send(ActionChannel::DestroyAll, Vec::new());

        let mut late = hub.connect(2);
        assert!(late.poll().is_none());
        let _ = a.send(ActionChannel::DestroyAll, Vec::new());
        assert_eq!(late.backlog(), 1);
    }

    #[test]
    fn test_dropped_endpoint_is_pruned() {
        let hub = LockstepHub::new();
        let mut a = hub.connect(1);
        drop(hub.connect(2));
        let _ = a.send(ActionChannel::DestroyAll, Vec::new());
        assert_eq!(a.backlog(), 1);
        assert_eq!(ActionChannel::from_u8(4), Some(ActionChannel::ExtensionMethod));
        assert_eq!(ActionChannel::from_u8(5), None);
    }
}
