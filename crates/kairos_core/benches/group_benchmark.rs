//! # Group Benchmark
//!
//! Measures the three hot paths of the registry:
//! 1. Spawning into an existing group (pending-add + compaction)
//! 2. Structural churn (remove from one group, append to another)
//! 3. Snapshot iteration of a populated group

#![allow(missing_docs)]

use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use kairos_core::{Component, ComponentId, Entity, World};

const ENTITY_COUNT: usize = 10_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

impl Component for Position {
    const ID: ComponentId = ComponentId::new(1);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    dx: f32,
    dy: f32,
    dz: f32,
}

impl Component for Velocity {
    const ID: ComponentId = ComponentId::new(2);
}

fn populated_world() -> (World, Vec<Entity>) {
    let world = World::new();
    let entities = (0..ENTITY_COUNT)
        .map(|_| {
            world
                .new_entity((Position::default(), Velocity::default()))
                .expect("fresh entity")
        })
        .collect();
    world.flush();
    (world, entities)
}

fn bench_spawn(c: &mut Criterion) {
    c.bench_function("spawn_10k_into_group", |b| {
        b.iter_batched(
            World::new,
            |world| {
                for _ in 0..ENTITY_COUNT {
                    black_box(world.new_entity((Position::default(),)).expect("spawn"));
                }
                world.flush();
                world
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_structural_churn(c: &mut Criterion) {
    let (world, entities) = populated_world();

    c.bench_function("churn_remove_add_velocity_10k", |b| {
        b.iter(|| {
            for entity in &entities {
                let velocity = entity.remove::<Velocity>(&world).expect("has velocity");
                entity.add(&world, velocity).expect("velocity removed");
            }
            world.flush();
        });
    });
}

fn bench_snapshot_iteration(c: &mut Criterion) {
    let (world, _entities) = populated_world();
    let group = world.group_for_components(&[Position::ID, Velocity::ID]);

    c.bench_function("snapshot_iterate_10k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for entity in group.snapshot().iter() {
                sum = sum.wrapping_add(entity.id());
            }
            black_box(sum)
        });
    });
}

criterion_group!(
    benches,
    bench_spawn,
    bench_structural_churn,
    bench_snapshot_iteration
);
criterion_main!(benches);
