//! # Persistence Verification
//!
//! Snapshots for late join, exports across builds, and time slicing.
//!
//! Run with: cargo test --test persistence -- --nocapture

mod common;

use common::{
    assert_converged, replica, replica_of_build, settle, snapshot, update_all, HealthData,
    HealthExtension, TagData, CRATE, DT, NPC,
};
use concord_core::StreamWriter;
use concord_replication::{
    DeserializeOperation, EntitySystem, ExportOperation, FrameBudget, ImportOperation,
    LockstepHub, OpaqueExtensionData, Placement, Prototype, Quat, SerializeOperation, Transform,
    Vec3, EXPORT_FORMAT_VERSION,
};

/// Two NPCs with distinct tags and health, one crate destroyed in between.
fn populated(hub: &LockstepHub) -> EntitySystem {
    let mut system = replica(hub, 1);
    let doomed = system.create(CRATE, Vec3::ZERO, Quat::IDENTITY).unwrap();
    let guard = system.create(NPC, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY).unwrap();
    let smith = system.create(NPC, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY).unwrap();
    system.update(DT);

    let _ = system.invoke_extension_by_name(guard, 0, "set", &TagData::payload("guard"));
    let _ = system.invoke_extension_by_name(smith, 0, "set", &TagData::payload("smith"));
    let _ = system.invoke_extension(guard, 1, HealthExtension::DAMAGE, &HealthExtension::amount(25));
    let _ = system.destroy(doomed);
    system.update(DT);
    system
}

fn label(system: &EntitySystem, id: u32) -> String {
    let data = system.get(system.find_by_id(id).unwrap()).unwrap();
    data.extension::<TagData>(0).unwrap().label.clone()
}

#[test]
fn verify_moved_then_destroyed_entity_is_not_exported() {
    let hub = LockstepHub::new();
    let mut system = replica(&hub, 1);
    let handle = system.create(CRATE, Vec3::ZERO, Quat::IDENTITY).unwrap();
    system.update(DT);
    assert!(system.set_position(handle, Vec3::new(5.0, 0.0, 0.0)));
    for _ in 0..12 {
        system.update(DT);
    }
    assert_eq!(system.get(handle).unwrap().transform().position, Vec3::new(5.0, 0.0, 0.0));
    assert!(system.destroy(handle));
    system.update(DT);

    let bytes = ExportOperation::run(&system);
    let mut target = replica(&hub, 2);
    let report = ImportOperation::run(&mut target, bytes);

    assert!(report.error.is_none());
    assert_eq!(report.format_version, EXPORT_FORMAT_VERSION);
    assert_eq!(target.live_count(), 0);
    assert_eq!(report.entities_imported, 0);
    let crate_entry = report
        .prototypes
        .iter()
        .find(|proto| proto.source_id == CRATE)
        .unwrap();
    assert_eq!(crate_entry.name, "crate");
    assert_eq!(crate_entry.display_name, "Wooden Crate");
    assert_eq!(crate_entry.local_id, Some(CRATE));
}

#[test]
fn verify_export_round_trip_renumbers_runtime_entities() {
    let hub = LockstepHub::new();
    let source = populated(&hub);
    assert_eq!(source.live_count(), 2);

    let mut target = replica(&hub, 2);
    let report = ImportOperation::run(&mut target, ExportOperation::run(&source));

    assert_eq!(report.entities_imported, 2);
    assert_eq!(report.skipped_entities, 0);
    assert_eq!(report.skipped_extensions, 0);
    // Destroying id 1 swapped id 3 to the front of the live order
    assert_eq!(report.id_remap.get(&3), Some(&1));
    assert_eq!(report.id_remap.get(&2), Some(&2));
    assert_eq!(target.next_id(), 3);

    assert_eq!(label(&target, 1), "smith");
    assert_eq!(label(&target, 2), "guard");
    let guard = target.get(target.find_by_id(2).unwrap()).unwrap();
    assert_eq!(guard.extension::<HealthData>(1).unwrap().hp, 75);
    assert_eq!(guard.transform().position, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(guard.created_by(), 1);
    assert!(guard.imported_metadata().is_none());
}

#[test]
fn verify_import_survives_renamed_and_removed_extensions() {
    let hub = LockstepHub::new();
    let source = populated(&hub);
    let bytes = ExportOperation::run(&source);

    // "health" now names a different type: slot keeps its default
    let mut renamed = replica_of_build(
        &hub,
        2,
        vec![Prototype::new(7, "npc")
            .with_extension("tag", 1)
            .with_extension("vitality", 2)],
    );
    let report = ImportOperation::run(&mut renamed, bytes.clone());
    assert!(report.error.is_none());
    assert_eq!(report.entities_imported, 2);
    assert_eq!(report.skipped_extensions, 2);
    assert_eq!(report.skipped_entities, 0);
    assert_eq!(label(&renamed, 2), "guard");
    let npc = report.prototypes.iter().find(|proto| proto.name == "npc").unwrap();
    assert_eq!(npc.local_id, Some(7));
    assert_eq!(npc.extensions[1].slot, None);
    let vitality = renamed
        .get(renamed.find_by_id(1).unwrap())
        .unwrap()
        .extension::<OpaqueExtensionData>(1)
        .unwrap();
    assert!(vitality.bytes().is_empty());

    // "health" dropped entirely, and the crate prototype is gone
    let mut trimmed = replica_of_build(&hub, 3, vec![Prototype::new(3, "npc").with_extension("tag", 1)]);
    let report = ImportOperation::run(&mut trimmed, bytes.clone());
    assert_eq!(report.skipped_extensions, 2);
    assert_eq!(label(&trimmed, 1), "smith");
    assert!(report
        .prototypes
        .iter()
        .any(|proto| proto.name == "crate" && proto.local_id.is_none()));

    // Reordered list: matched by local id, not position
    let mut reordered = replica_of_build(
        &hub,
        4,
        vec![Prototype::new(3, "npc")
            .with_extension("health", 2)
            .with_extension("tag", 1)],
    );
    let report = ImportOperation::run(&mut reordered, bytes);
    assert_eq!(report.skipped_extensions, 0);
    let guard = reordered.get(reordered.find_by_id(2).unwrap()).unwrap();
    assert_eq!(guard.extension::<HealthData>(0).unwrap().hp, 75);
    assert_eq!(guard.extension::<TagData>(1).unwrap().label, "guard");
}

#[test]
fn verify_unknown_prototype_entities_are_skipped() {
    let hub = LockstepHub::new();
    let mut source = replica(&hub, 1);
    let _ = source.create(CRATE, Vec3::ZERO, Quat::IDENTITY);
    let _ = source.create(NPC, Vec3::ZERO, Quat::IDENTITY);
    source.update(DT);

    let mut target = replica_of_build(&hub, 2, vec![Prototype::new(1, "npc").with_extension("tag", 1)]);
    let report = ImportOperation::run(&mut target, ExportOperation::run(&source));
    assert_eq!(report.skipped_entities, 1);
    assert_eq!(report.entities_imported, 1);
    assert_eq!(target.live_count(), 1);
    assert_eq!(report.id_remap.len(), 1);
}

#[test]
fn verify_unsupported_export_version_is_rejected() {
    let hub = LockstepHub::new();
    let source = populated(&hub);
    let mut bytes = ExportOperation::run(&source);
    bytes[0] = 0xEE;

    let mut target = replica(&hub, 2);
    let _ = target.create(CRATE, Vec3::ZERO, Quat::IDENTITY);
    target.update(DT);
    let report = ImportOperation::run(&mut target, bytes);
    assert!(report.error.is_some());
    assert_eq!(target.live_count(), 1);
}

#[test]
fn verify_hostile_extension_count_is_reported() {
    let mut writer = StreamWriter::new();
    writer.write_u16(EXPORT_FORMAT_VERSION);
    writer.write_small_uint(0);
    writer.write_small_uint(1);
    writer.write_small_uint(NPC);
    writer.write_str("npc");
    writer.write_str("NPC");
    writer.write_small_uint(u32::MAX);

    let hub = LockstepHub::new();
    let mut target = replica(&hub, 2);
    let report = ImportOperation::run(&mut target, writer.into_bytes());
    assert!(report.error.is_some());
    assert_eq!(report.entities_imported, 0);
    assert_eq!(target.live_count(), 0);
}

#[test]
fn verify_truncated_import_keeps_complete_entities() {
    let hub = LockstepHub::new();
    let source = populated(&hub);
    let mut bytes = ExportOperation::run(&source);
    // Cuts into the guard's body, the last one in the stream
    bytes.truncate(bytes.len() - 2);

    let mut target = replica(&hub, 2);
    let report = ImportOperation::run(&mut target, bytes);
    assert!(report.error.is_some());
    assert_eq!(report.entities_imported, 1);
    assert_eq!(report.id_remap.len(), 1);
    assert_eq!(report.id_remap.get(&3), Some(&1));
    assert_eq!(target.live_count(), 1);
    assert_eq!(label(&target, 1), "smith");

    let smith = target.find_by_id(1).unwrap();
    assert!(target.get(smith).unwrap().imported_metadata().is_none());
    settle(std::slice::from_mut(&mut target));
    assert!(target.entity(smith).is_some());
}

#[test]
fn verify_import_is_deterministic_across_replicas() {
    let hub = LockstepHub::new();
    let source = populated(&hub);
    let bytes = ExportOperation::run(&source);

    let mut replicas = vec![replica(&hub, 2), replica(&hub, 3)];
    // Runtime entities present before the import are replaced
    let _ = replicas[0].create(CRATE, Vec3::ZERO, Quat::IDENTITY);
    update_all(&mut replicas, DT);

    for system in &mut replicas {
        let _ = ImportOperation::run(system, bytes.clone());
    }
    assert_converged(&replicas);
}

#[test]
fn verify_placements_keep_their_ids_through_export() {
    let hub = LockstepHub::new();
    let placements = || {
        vec![
            Placement::new(10, CRATE, Transform::IDENTITY),
            Placement::new(11, NPC, Transform::IDENTITY)
                .with_parent(10)
                .with_extension(0, 1, TagData::payload("sign")),
        ]
    };

    let mut source = replica(&hub, 1);
    source.register_pre_instantiated(placements()).unwrap();
    let _ = source.create(CRATE, Vec3::ZERO, Quat::IDENTITY);
    source.update(DT);
    assert_eq!(source.find_by_id(12).map(|h| source.get(h).unwrap().prototype_id()), Some(CRATE));

    let mut target = replica(&hub, 2);
    target.register_pre_instantiated(placements()).unwrap();
    let report = ImportOperation::run(&mut target, ExportOperation::run(&source));

    assert_eq!(report.highest_pre_instantiated_id, 11);
    assert_eq!(report.id_remap.get(&10), Some(&10));
    assert_eq!(report.id_remap.get(&11), Some(&11));
    assert_eq!(report.id_remap.get(&12), Some(&12));
    assert_eq!(label(&target, 11), "sign");

    let sign = target.find_by_id(11).unwrap();
    let post = target.find_by_id(10).unwrap();
    assert_eq!(target.get(sign).unwrap().parent(), Some(post));
    assert_eq!(target.get(post).unwrap().children(), &[sign]);
}

#[test]
fn verify_late_join_snapshot_then_live_actions() {
    let hub = LockstepHub::new();
    let mut host = populated(&hub);

    let mut late = replica(&hub, 2);
    DeserializeOperation::run(&mut late, snapshot(&host)).unwrap();
    assert_eq!(late.live_count(), 2);
    assert_eq!(snapshot(&late), snapshot(&host));

    let guard = host.find_by_id(2).unwrap();
    let _ = host.invoke_extension(guard, 1, HealthExtension::HEAL, &HealthExtension::amount(5));
    let _ = late.create(CRATE, Vec3::ONE, Quat::IDENTITY);
    let mut replicas = [host, late];
    settle(&mut replicas);

    assert_converged(&replicas);
    let hp = replicas[1]
        .get(replicas[1].find_by_id(2).unwrap())
        .unwrap()
        .extension::<HealthData>(1)
        .unwrap()
        .hp;
    assert_eq!(hp, 80);
    assert_eq!(replicas[1].next_id(), 5);
}

#[test]
fn verify_tiny_budget_matches_single_pass() {
    let hub = LockstepHub::new();
    let source = populated(&hub);

    let mut export = ExportOperation::new(&source);
    let mut export_slices = 1;
    while !export.step(&source, &mut FrameBudget::from_millis(0)).is_done() {
        export_slices += 1;
    }
    assert!(export_slices > 1);
    let sliced = export.into_bytes();
    assert_eq!(sliced, ExportOperation::run(&source));

    let mut whole = replica(&hub, 2);
    let _ = ImportOperation::run(&mut whole, sliced.clone());

    let mut stepped = replica(&hub, 3);
    let mut import = ImportOperation::new(sliced);
    while !import.step(&mut stepped, &mut FrameBudget::from_millis(0)).is_done() {}
    assert!(import.report().error.is_none());
    assert_eq!(snapshot(&stepped), snapshot(&whole));

    let mut late = replica(&hub, 4);
    let mut serialize = SerializeOperation::new(&source);
    while !serialize.step(&source, &mut FrameBudget::from_millis(0)).is_done() {}
    let mut deserialize = DeserializeOperation::new(serialize.into_bytes());
    while !deserialize.step(&mut late, &mut FrameBudget::from_millis(0)).is_done() {}
    assert!(deserialize.error().is_none());
    assert_eq!(snapshot(&late), snapshot(&source));
}
