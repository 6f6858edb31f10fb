//! Shared fixtures for integration tests: two test extensions, a prototype
//! catalog and helpers that wire replicas to one in-process hub.

#![allow(dead_code)]

use std::any::Any;

use concord_core::{StreamReader, StreamWriter, WireError, WireResult};
use concord_replication::{
    EntitySystem, Extension, ExtensionContext, ExtensionData, ExtensionKind, ExtensionRegistry,
    LockstepHub, Prototype, PrototypeRegistry, ReplicationConfig, SerializeOperation,
};

pub const CRATE: u32 = 1;
pub const BARREL: u32 = 2;
pub const NPC: u32 = 3;

pub const DT: f32 = 1.0 / 60.0;

// ============================================================================
// TEST EXTENSIONS
// ============================================================================

/// Hit points with `damage` and `heal` methods.
pub struct HealthExtension;

impl HealthExtension {
    pub const DAMAGE: u16 = 0;
    pub const HEAL: u16 = 1;

    pub fn amount(value: u32) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }
}

impl ExtensionKind for HealthExtension {
    const TYPE_NAME: &'static str = "health";
    const METHODS: &'static [&'static str] = &["damage", "heal"];
    type Data = HealthData;
    type Behavior = HealthBar;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthData {
    pub hp: u32,
}

impl Default for HealthData {
    fn default() -> Self {
        Self { hp: 100 }
    }
}

impl ExtensionData for HealthData {
    fn write(&self, writer: &mut StreamWriter) {
        writer.write_u32(self.hp);
    }

    fn read(&mut self, reader: &mut StreamReader<'_>, version: u16) -> WireResult<()> {
        if version != 1 {
            return Err(WireError::InvalidValue {
                field: "health version",
                value: u64::from(version),
            });
        }
        self.hp = reader.read_u32()?;
        Ok(())
    }

    fn invoke(
        &mut self,
        method: u16,
        reader: &mut StreamReader<'_>,
        _ctx: &mut ExtensionContext,
    ) -> WireResult<()> {
        let amount = reader.read_u32()?;
        match method {
            HealthExtension::DAMAGE => self.hp = self.hp.saturating_sub(amount),
            _ => self.hp = self.hp.saturating_add(amount),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct HealthBar {
    pub shown: u32,
}

impl Extension for HealthBar {
    fn refresh(&mut self, data: &dyn ExtensionData) {
        if let Some(health) = data.as_any().downcast_ref::<HealthData>() {
            self.shown = health.hp;
        }
    }

    fn reset(&mut self) {
        self.shown = 0;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Free-form label with a `set` method.
pub struct TagExtension;

impl ExtensionKind for TagExtension {
    const TYPE_NAME: &'static str = "tag";
    const METHODS: &'static [&'static str] = &["set"];
    type Data = TagData;
    type Behavior = TagLabel;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagData {
    pub label: String,
}

impl TagData {
    pub fn payload(label: &str) -> Vec<u8> {
        let mut writer = StreamWriter::new();
        writer.write_str(label);
        writer.into_bytes()
    }
}

impl ExtensionData for TagData {
    fn write(&self, writer: &mut StreamWriter) {
        writer.write_str(&self.label);
    }

    fn read(&mut self, reader: &mut StreamReader<'_>, _version: u16) -> WireResult<()> {
        self.label = reader.read_string()?;
        Ok(())
    }

    fn invoke(
        &mut self,
        _method: u16,
        reader: &mut StreamReader<'_>,
        _ctx: &mut ExtensionContext,
    ) -> WireResult<()> {
        self.label = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct TagLabel;

impl Extension for TagLabel {
    fn refresh(&mut self, _data: &dyn ExtensionData) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// REPLICAS
// ============================================================================

/// crate (no extensions), barrel (physics), npc (tag, health).
pub fn prototypes() -> PrototypeRegistry {
    PrototypeRegistry::new(vec![
        Prototype::new(CRATE, "crate").with_display_name("Wooden Crate"),
        Prototype::new(BARREL, "barrel").with_extension("physics", 1),
        Prototype::new(NPC, "npc")
            .with_extension("tag", 1)
            .with_extension("health", 2),
    ])
    .unwrap()
}

pub fn extensions() -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::with_builtin();
    registry
        .register::<TagExtension>()
        .register::<HealthExtension>();
    registry
}

pub fn replica(hub: &LockstepHub, player_id: u32) -> EntitySystem {
    replica_with(hub, player_id, ReplicationConfig::default())
}

pub fn replica_with(hub: &LockstepHub, player_id: u32, config: ReplicationConfig) -> EntitySystem {
    EntitySystem::new(config, prototypes(), extensions(), hub.connect(player_id)).unwrap()
}

/// Replica of a different build: its own catalog, opaque extensions allowed.
pub fn replica_of_build(hub: &LockstepHub, player_id: u32, catalog: Vec<Prototype>) -> EntitySystem {
    let config = ReplicationConfig {
        allow_opaque_extensions: true,
        ..ReplicationConfig::default()
    };
    let prototypes = PrototypeRegistry::new(catalog).unwrap();
    EntitySystem::new(config, prototypes, extensions(), hub.connect(player_id)).unwrap()
}

/// Several replicas on one hub, players numbered from 1.
pub fn session(count: u32) -> (LockstepHub, Vec<EntitySystem>) {
    let hub = LockstepHub::new();
    let replicas = (1..=count).map(|player| replica(&hub, player)).collect();
    (hub, replicas)
}

pub fn update_all(replicas: &mut [EntitySystem], dt: f32) {
    for replica in replicas.iter_mut() {
        replica.update(dt);
    }
}

/// Runs frames until no replica has bind requests left.
pub fn settle(replicas: &mut [EntitySystem]) {
    for _ in 0..256 {
        update_all(replicas, DT);
        if replicas.iter().all(|replica| replica.pool().pending() == 0) {
            return;
        }
    }
}

pub fn snapshot(system: &EntitySystem) -> Vec<u8> {
    SerializeOperation::run(system)
}

pub fn assert_converged(replicas: &[EntitySystem]) {
    let reference = snapshot(&replicas[0]);
    for (index, replica) in replicas.iter().enumerate().skip(1) {
        assert_eq!(snapshot(replica), reference, "replica {index} diverged");
    }
}
