//! # Snapshot & Action Throughput Benchmark
//!
//! Targets:
//! - Serialize 10,000 entities well inside one frame budget
//! - Apply 10,000 create actions without per-action spikes
//!
//! Run with: `cargo bench --package concord_replication`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use concord_replication::{
    DeserializeOperation, EntitySystem, ExportOperation, ExtensionRegistry, ImportOperation,
    LockstepHub, Prototype, PrototypeRegistry, Quat, ReplicationConfig, SerializeOperation, Vec3,
};

fn system(hub: &LockstepHub, player_id: u32) -> EntitySystem {
    let prototypes = PrototypeRegistry::new(vec![
        Prototype::new(1, "crate"),
        Prototype::new(2, "barrel").with_extension("physics", 1),
    ])
    .unwrap();
    let config = ReplicationConfig {
        auto_activate: false,
        ..ReplicationConfig::default()
    };
    EntitySystem::new(config, prototypes, ExtensionRegistry::with_builtin(), hub.connect(player_id))
        .unwrap()
}

fn populated(hub: &LockstepHub, count: usize) -> EntitySystem {
    let mut system = system(hub, 1);
    for i in 0..count {
        let position = Vec3::new(i as f32, 0.0, (i % 17) as f32);
        let _ = system.create(1 + (i % 2) as u32, position, Quat::IDENTITY);
    }
    system.update(1.0 / 60.0);
    system
}

/// Benchmark: full snapshot write.
fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    for count in [1_000, 10_000] {
        let hub = LockstepHub::new();
        let source = populated(&hub, count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &source, |b, source| {
            b.iter(|| black_box(SerializeOperation::run(source)));
        });
    }
    group.finish();
}

/// Benchmark: full snapshot apply on a late joiner.
fn bench_deserialize(c: &mut Criterion) {
    let hub = LockstepHub::new();
    let source = populated(&hub, 10_000);
    let bytes = SerializeOperation::run(&source);
    let mut late = system(&hub, 2);

    c.bench_function("deserialize_10k", |b| {
        b.iter(|| DeserializeOperation::run(&mut late, black_box(bytes.clone())));
    });
}

/// Benchmark: export then import, prototype remapping included.
fn bench_export_import(c: &mut Criterion) {
    let hub = LockstepHub::new();
    let source = populated(&hub, 10_000);
    let mut target = system(&hub, 2);

    c.bench_function("export_import_10k", |b| {
        b.iter(|| {
            let bytes = ExportOperation::run(&source);
            black_box(ImportOperation::run(&mut target, bytes).entities_imported)
        });
    });
}

/// Benchmark: applying a burst of create actions.
fn bench_apply_creates(c: &mut Criterion) {
    c.bench_function("apply_10k_creates", |b| {
        b.iter(|| {
            let hub = LockstepHub::new();
            black_box(populated(&hub, 10_000).live_count())
        });
    });
}

criterion_group!(
    benches,
    bench_serialize,
    bench_deserialize,
    bench_export_import,
    bench_apply_creates
);
criterion_main!(benches);
