// Benchmarks for the task loop.
//
// `scheduler_throughput` measures raw queue push/pop cost with many
// same-time ties. `motion_traffic` runs a crowd of creatures walking back
// and forth across an open room, which exercises motion start/finish,
// entity indexing and access queries together.

use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use dungeon_sim::config::GameConfig;
use dungeon_sim::dispatch::{ActionContext, FnAction};
use dungeon_sim::entity::Entity;
use dungeon_sim::scheduler::{Scheduler, TaskKind};
use dungeon_sim::sim::SimContext;
use dungeon_sim::types::*;

fn scheduler_throughput(c: &mut Criterion) {
    c.bench_function("scheduler_add_10k", |b| {
        b.iter(|| {
            let mut s = Scheduler::new();
            for i in 0..10_000u64 {
                let priority = match i % 3 {
                    0 => Priority::Low,
                    1 => Priority::Normal,
                    _ => Priority::High,
                };
                s.add_task(TaskKind::ItemCheck, priority, i / 7);
            }
            black_box(s.len())
        })
    });

    c.bench_function("advance_10k_actions", |b| {
        let noop = FnAction::new("noop", |_, _| Ok(())).into_ref();
        b.iter_batched(
            || {
                let mut sim = SimContext::new(GameConfig::default(), 4, 4, 1);
                for i in 0..10_000u64 {
                    sim.schedule_action(noop.clone(), ActionContext::default(), i / 5);
                }
                sim
            },
            |mut sim| black_box(sim.advance_to(2_000)),
            BatchSize::LargeInput,
        )
    });
}

fn motion_traffic(c: &mut Criterion) {
    c.bench_function("walk_200_creatures", |b| {
        b.iter_batched(
            || {
                let mut sim = SimContext::new(GameConfig::default(), 40, 40, 7);
                let mut ids = Vec::new();
                for i in 0..200 {
                    let pos = MapCoord::new((i % 20) * 2, (i / 20) * 4);
                    let facing = if i % 2 == 0 {
                        MapDirection::South
                    } else {
                        MapDirection::East
                    };
                    if let Some(id) = sim.spawn_entity(Entity::creature(MapHeight::Walking, 100, 5), pos, facing) {
                        ids.push(id);
                    }
                }
                (sim, ids)
            },
            |(mut sim, ids)| {
                for round in 1..=10u64 {
                    for &id in &ids {
                        sim.move_entity(id, MotionType::Move);
                        sim.flip_motion(id);
                    }
                    sim.advance_to(round * 1_500);
                }
                black_box(sim.gvt())
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, scheduler_throughput, motion_traffic);
criterion_main!(benches);
