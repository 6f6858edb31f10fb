//! # Entity Pool
//!
//! Recycles instantiated representations across records.
//!
//! ## Design
//!
//! - Bind requests wait in a priority queue and are drained a few per frame,
//!   so a burst of spawns never becomes a frame spike
//! - Returned entities are reset and parked on a per-prototype free list
//! - A request whose record vanished or no longer wants a representation is
//!   skipped when dequeued

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use concord_core::Handle;

use crate::entity::Entity;
use crate::entity_data::EntityData;
use crate::extension::ExtensionRegistry;
use crate::prototype::Prototype;

/// Urgency of a bind request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BindPriority {
    /// Background activation.
    Low,
    /// Default.
    Normal,
    /// Locally created entities, shown as soon as possible.
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BindRequest {
    priority: BindPriority,
    sequence: u64,
    data: Handle<EntityData>,
}

impl Ord for BindRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then older requests first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for BindRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Entities created because no free one was available.
    pub instantiated: u64,
    /// Entities taken from a free list.
    pub reused: u64,
    /// Entities returned to a free list.
    pub returned: u64,
    /// Dequeued requests that no longer applied.
    pub skipped_stale: u64,
}

/// Bind queue plus per-prototype free lists.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. It is owned by the entity system.
#[derive(Debug, Default)]
pub struct EntityPool {
    requests: BinaryHeap<BindRequest>,
    sequence: u64,
    free: HashMap<u32, Vec<Entity>>,
    stats: PoolStats,
}

impl EntityPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a bind request.
    pub fn request(&mut self, data: Handle<EntityData>, priority: BindPriority) {
        self.sequence += 1;
        self.requests.push(BindRequest {
            priority,
            sequence: self.sequence,
            data,
        });
    }

    /// Dequeues the most urgent request.
    pub fn next_request(&mut self) -> Option<Handle<EntityData>> {
        self.requests.pop().map(|request| request.data)
    }

    /// Number of queued requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Counts a dequeued request that no longer applied.
    pub fn record_stale(&mut self) {
        self.stats.skipped_stale += 1;
    }

    /// Takes a free entity of `prototype`, instantiating one if none is free.
    pub fn acquire(&mut self, prototype: &Prototype, registry: &ExtensionRegistry) -> Entity {
        if let Some(entity) = self.free.get_mut(&prototype.id).and_then(Vec::pop) {
            self.stats.reused += 1;
            return entity;
        }
        self.stats.instantiated += 1;
        Entity::instantiate(prototype, registry)
    }

    /// Deactivates, detaches and resets `entity`, then parks it.
    pub fn return_entity(&mut self, mut entity: Entity, prototype: &Prototype) {
        entity.reset_to_default(prototype);
        self.stats.returned += 1;
        self.free.entry(prototype.id).or_default().push(entity);
    }

    /// Instantiates `count` entities of `prototype` ahead of time.
    pub fn prewarm(&mut self, prototype: &Prototype, registry: &ExtensionRegistry, count: usize) {
        let list = self.free.entry(prototype.id).or_default();
        for _ in 0..count {
            list.push(Entity::instantiate(prototype, registry));
        }
        self.stats.instantiated += count as u64;
    }

    /// Free entities of one prototype.
    #[must_use]
    pub fn free_count(&self, prototype_id: u32) -> usize {
        self.free.get(&prototype_id).map_or(0, Vec::len)
    }

    /// Free entities across every prototype.
    #[must_use]
    pub fn total_free(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Counters since creation.
    #[must_use]
    pub const fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{Arena, Transform};

    #[test]
    fn test_request_order() {
        let registry = ExtensionRegistry::new();
        let proto = Prototype::new(1, "crate");
        let mut arena: Arena<EntityData> = Arena::new();
        let handles: Vec<Handle<EntityData>> = (0..4)
            .map(|_| arena.insert(EntityData::from_prototype(&proto, &registry, Transform::IDENTITY)))
            .collect();

        let mut pool = EntityPool::new();
        pool.request(handles[0], BindPriority::Low);
        pool.request(handles[1], BindPriority::High);
        pool.request(handles[2], BindPriority::Normal);
        pool.request(handles[3], BindPriority::High);
        assert_eq!(pool.pending(), 4);

        let order: Vec<Handle<EntityData>> = std::iter::from_fn(|| pool.next_request()).collect();
        assert_eq!(order, vec![handles[1], handles[3], handles[2], handles[0]]);
    }

    #[test]
    fn test_free_list_reuse() {
        let registry = ExtensionRegistry::with_builtin();
        let proto = Prototype::new(3, "barrel");
        let mut pool = EntityPool::new();

        let first = pool.acquire(&proto, &registry);
        let second = pool.acquire(&proto, &registry);
        pool.return_entity(first, &proto);
        pool.return_entity(second, &proto);
        assert_eq!(pool.free_count(3), 2);

        let _again = pool.acquire(&proto, &registry);
        let stats = pool.stats();
        assert_eq!(stats.instantiated, 2);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.returned, 2);
        assert_eq!(pool.free_count(3), 1);
    }

    #[test]
    fn test_prewarm() {
        let registry = ExtensionRegistry::new();
        let proto = Prototype::new(1, "crate");
        let mut pool = EntityPool::new();
        pool.prewarm(&proto, &registry, 5);
        assert_eq!(pool.total_free(), 5);
        assert_eq!(pool.free_count(2), 0);
    }
}
