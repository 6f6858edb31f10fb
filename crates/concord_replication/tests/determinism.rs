//! # Determinism Verification
//!
//! Replicas fed the same action order must hold byte-identical state,
//! whatever the local timing, binding and latency-hiding choices.
//!
//! Run with: cargo test --test determinism -- --nocapture

mod common;

use common::{
    assert_converged, replica, session, settle, snapshot, update_all, HealthData,
    HealthExtension, TagData, BARREL, CRATE, DT, NPC,
};
use concord_replication::{
    ChannelValue, EntitySystem, LockstepHub, PhysicsExtension, Quat, ReplicationConfig,
    TransformChannel, Vec3,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_vec3(rng: &mut ChaCha8Rng) -> Vec3 {
    Vec3::new(
        rng.gen_range(-50.0..50.0),
        rng.gen_range(0.0..10.0),
        rng.gen_range(-50.0..50.0),
    )
}

/// One random local call on `system`.
fn random_call(rng: &mut ChaCha8Rng, system: &mut EntitySystem) {
    let live = system.live().to_vec();
    let target = if live.is_empty() {
        None
    } else {
        Some(live[rng.gen_range(0..live.len())])
    };

    match (rng.gen_range(0..8), target) {
        (0 | 1, _) | (_, None) => {
            let prototype = [CRATE, BARREL, NPC][rng.gen_range(0..3)];
            let _ = system.create(prototype, random_vec3(rng), Quat::from_rotation_y(rng.gen()));
        }
        (2, Some(handle)) => {
            let _ = system.destroy(handle);
        }
        (3, Some(handle)) => {
            let _ = system.set_position(handle, random_vec3(rng));
        }
        (4, Some(handle)) => {
            let _ = system.teleport(handle, random_vec3(rng));
        }
        (5, Some(handle)) => {
            let _ = system.set_scale(handle, Vec3::new(2.0, 2.0, 2.0));
        }
        (6, Some(handle)) => {
            let prototype = system.get(handle).map(|data| data.prototype_id());
            if prototype == Some(NPC) {
                let amount = rng.gen_range(1..40);
                let _ = system.invoke_extension(
                    handle,
                    1,
                    HealthExtension::DAMAGE,
                    &HealthExtension::amount(amount),
                );
            } else if prototype == Some(BARREL) {
                let payload = PhysicsExtension::pose_payload(random_vec3(rng), Quat::IDENTITY, Vec3::ZERO);
                let _ = system.invoke_extension(handle, 0, PhysicsExtension::WAKE, &payload);
            }
        }
        (_, Some(handle)) => {
            let prototype = system.get(handle).map(|data| data.prototype_id());
            if prototype == Some(BARREL) {
                let payload = PhysicsExtension::rest_payload(random_vec3(rng), Quat::IDENTITY);
                let _ = system.invoke_extension(handle, 0, PhysicsExtension::SLEEP, &payload);
            } else if prototype == Some(NPC) {
                let _ = system.invoke_extension_by_name(handle, 0, "set", &TagData::payload("guard"));
            }
        }
    }
}

#[test]
fn verify_random_sessions_converge() {
    for seed in [1_u64, 7, 42, 1337] {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (_hub, mut replicas) = session(3);

        for _ in 0..120 {
            for player in 0..replicas.len() {
                if rng.gen_bool(0.6) {
                    random_call(&mut rng, &mut replicas[player]);
                }
            }
            // Replicas drain at different paces; only the order matters
            let lagging = rng.gen_range(0..replicas.len());
            for (index, replica) in replicas.iter_mut().enumerate() {
                if index != lagging {
                    replica.update(DT);
                }
            }
        }
        // Flush every coalesced edit, then let all replicas catch up
        for _ in 0..30 {
            update_all(&mut replicas, DT);
        }

        assert_converged(&replicas);
        println!(
            "seed {seed}: {} live entities, {} bytes",
            replicas[0].live_count(),
            snapshot(&replicas[0]).len()
        );
    }
}

#[test]
fn verify_binding_does_not_affect_state() {
    let hub = LockstepHub::new();
    let mut bound = replica(&hub, 1);
    let mut headless = common::replica_with(
        &hub,
        2,
        ReplicationConfig {
            auto_activate: false,
            ..ReplicationConfig::default()
        },
    );

    for x in 0..10 {
        let _ = bound.create(NPC, Vec3::new(x as f32, 0.0, 0.0), Quat::IDENTITY);
    }
    bound.update(DT);
    headless.update(DT);
    let target = bound.find_by_id(3).unwrap();
    let _ = bound.invoke_extension(target, 1, HealthExtension::DAMAGE, &HealthExtension::amount(30));

    let mut replicas = [bound, headless];
    settle(&mut replicas);

    assert_eq!(replicas[1].bound_count(), 0);
    assert_eq!(replicas[0].bound_count(), 10);
    assert_converged(&replicas);
    let hp = replicas[1]
        .get(replicas[1].find_by_id(3).unwrap())
        .unwrap()
        .extension::<HealthData>(1)
        .unwrap()
        .hp;
    assert_eq!(hp, 70);
}

#[test]
fn verify_local_edit_shows_immediately_and_echo_is_idempotent() {
    let (_hub, mut replicas) = session(2);
    let handle = replicas[0].create(CRATE, Vec3::ZERO, Quat::IDENTITY).unwrap();
    // Provisional entities bind with high priority on the next frame
    update_all(&mut replicas, DT);
    assert!(replicas[0].entity(handle).is_some());

    let target = Vec3::new(5.0, 0.0, 0.0);
    assert!(replicas[0].set_position(handle, target));
    let shown = replicas[0].entity(handle).unwrap().visual_transform().position;
    assert_eq!(shown, target);
    // Not replicated yet
    assert_eq!(replicas[0].get(handle).unwrap().transform().position, Vec3::ZERO);

    for _ in 0..12 {
        update_all(&mut replicas, DT);
        let shown = replicas[0].entity(handle).unwrap().visual_transform().position;
        assert_eq!(shown, target, "echo must not restart the visual");
    }
    assert_eq!(replicas[0].get(handle).unwrap().transform().position, target);
    let remote = replicas[1].find_by_id(1).unwrap();
    assert_eq!(replicas[1].get(remote).unwrap().transform().position, target);
    assert_converged(&replicas);
}

#[test]
fn verify_display_follows_record_when_edits_interleave() {
    let (_hub, mut replicas) = session(2);
    let handle = replicas[0].create(CRATE, Vec3::ZERO, Quat::IDENTITY).unwrap();
    settle(&mut replicas);
    let remote = replicas[1].find_by_id(1).unwrap();

    // Player 2's edit is ordered first, player 1's lands on top of it
    assert!(replicas[1].set_position(remote, Vec3::new(9.0, 0.0, 0.0)));
    for _ in 0..3 {
        update_all(&mut replicas, DT);
    }
    assert!(replicas[0].set_position(handle, Vec3::new(5.0, 0.0, 0.0)));
    for _ in 0..20 {
        update_all(&mut replicas, DT);
    }

    for (system, handle) in [(&replicas[0], handle), (&replicas[1], remote)] {
        let data = system.get(handle).unwrap().transform().position;
        let shown = system.entity(handle).unwrap().visual_transform().position;
        assert_eq!(data, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(shown, data);
    }
    assert_converged(&replicas);
}

#[test]
fn verify_destroy_all_empties_every_replica() {
    let (_hub, mut replicas) = session(3);
    for player in 0..3 {
        for _ in 0..5 {
            let _ = replicas[player].create(BARREL, Vec3::ZERO, Quat::IDENTITY);
        }
    }
    settle(&mut replicas);
    assert_eq!(replicas[2].live_count(), 15);

    replicas[1].destroy_all();
    // The local side hides everything before the action is applied
    assert_eq!(replicas[1].bound_count(), 0);
    update_all(&mut replicas, DT);

    for replica in &replicas {
        assert_eq!(replica.live_count(), 0);
        assert_eq!(replica.bound_count(), 0);
        assert_eq!(replica.next_id(), 16);
    }
    assert!(replicas[0].pool().total_free() > 0);
    assert_converged(&replicas);
}

#[test]
fn verify_owned_channel_is_not_generically_synced() {
    let (_hub, mut replicas) = session(2);
    let handle = replicas[0].create(BARREL, Vec3::ZERO, Quat::IDENTITY).unwrap();
    settle(&mut replicas);

    let wake = PhysicsExtension::pose_payload(Vec3::new(0.0, 3.0, 0.0), Quat::IDENTITY, Vec3::ZERO);
    let _ = replicas[0].invoke_extension(handle, 0, PhysicsExtension::WAKE, &wake);
    update_all(&mut replicas, DT);
    assert!(replicas[0]
        .get(handle)
        .unwrap()
        .no_sync()
        .contains(TransformChannel::Position));

    // Owned channels refuse local edits; scale is still generic
    assert!(!replicas[0].set_position(handle, Vec3::new(9.0, 9.0, 9.0)));
    assert!(replicas[0].set_scale(handle, Vec3::new(2.0, 2.0, 2.0)));
    for _ in 0..12 {
        update_all(&mut replicas, DT);
    }

    for replica in &replicas {
        let data = replica.get(replica.find_by_id(1).unwrap()).unwrap();
        assert_eq!(data.transform().position, Vec3::ZERO);
        assert_eq!(data.effective_transform().position, Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(data.transform().scale, Vec3::new(2.0, 2.0, 2.0));
    }

    // A forced release from a deterministic context returns the channel
    for replica in &mut replicas {
        let handle = replica.find_by_id(1).unwrap();
        assert!(replica.give_back_control_of(
            handle,
            ChannelValue::Position(Vec3::new(1.0, 0.0, 0.0)),
            None,
            0.0,
        ));
    }
    assert_converged(&replicas);
    assert!(replicas[1]
        .get(replicas[1].find_by_id(1).unwrap())
        .unwrap()
        .no_sync()
        .contains(TransformChannel::Rotation));
}
