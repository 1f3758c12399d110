//! 桥接层性能基准测试
//!
//! 测试符号解析、实体查找、字符串编解码和每帧调用的开销

use bevy_ecs::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use native_bridge::abi::{BoundaryStringCodec, FrameContext, HostApi, StatusCode, Update};
use native_bridge::bridge::{
    EntityLookupCache, FunctionResolver, ModulePool, Requirement, StaticModule,
    StaticModuleLoader,
};
use native_bridge::config::BehaviorConfig;
use native_bridge::ecs::{Tag, Transform, WorldEntityRegistry};
use native_bridge::host::BehaviorHost;

unsafe extern "C" fn chase<'a>(mut ctx: FrameContext<'a>, host: *const HostApi) -> FrameContext<'a> {
    let target = unsafe { (*host).find_entity("Player") };
    ctx.transform.position = target.transform.position;
    ctx
}

unsafe extern "C" fn destroy(_ctx: FrameContext<'_>, _host: *const HostApi) -> StatusCode {
    StatusCode::OK
}

fn loader() -> StaticModuleLoader {
    StaticModuleLoader::new().with_module(
        "chase",
        StaticModule::new().with_update(chase).with_destroy(destroy),
    )
}

fn populated_world(count: usize) -> World {
    let mut world = World::new();
    for i in 0..count {
        world.spawn((
            Transform::from_position(Vec3::splat(i as f32)),
            Tag::new(format!("Enemy{}", i)),
        ));
    }
    world.spawn((Transform::default(), Tag::new("Player")));
    world
}

fn bench_symbol_resolution(c: &mut Criterion) {
    let mut pool = ModulePool::with_static(loader());
    let handle = pool.load("chase").expect("static module");
    let mut resolver = FunctionResolver::new();

    c.bench_function("resolve_cached_update", |b| {
        b.iter(|| {
            black_box(
                resolver
                    .bind::<Update>(&pool, &handle, Requirement::Optional)
                    .expect("bind"),
            )
        });
    });
}

fn bench_entity_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity_lookup");

    for count in [10, 100, 1000].iter() {
        let world = populated_world(*count);
        group.bench_with_input(BenchmarkId::new("cached", count), count, |b, _| {
            let registry = WorldEntityRegistry::new(&world);
            let mut cache = EntityLookupCache::new();
            b.iter(|| black_box(cache.lookup(black_box("Player"), &registry)));
        });
        group.bench_with_input(BenchmarkId::new("uncached", count), count, |b, _| {
            let registry = WorldEntityRegistry::new(&world);
            b.iter(|| {
                let mut cache = EntityLookupCache::new();
                black_box(cache.lookup(black_box("Player"), &registry))
            });
        });
    }

    group.finish();
}

fn bench_string_codec(c: &mut Criterion) {
    let long = "ユニット".repeat(64);
    c.bench_function("decode_tag_256b", |b| {
        b.iter(|| {
            let tag = BoundaryStringCodec::encode(black_box(&long));
            black_box(unsafe { BoundaryStringCodec::decode(tag) })
        });
    });
}

fn bench_host_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_tick");

    for instances in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(instances),
            instances,
            |b, &instances| {
                let mut world = populated_world(100);
                let mut host =
                    BehaviorHost::new(ModulePool::with_static(loader()), FunctionResolver::new());
                for i in 0..instances {
                    let tag = format!("Follower{}", i);
                    let entity = world.spawn((Transform::default(), Tag::new(tag.clone()))).id();
                    host.attach(&mut world, entity, BehaviorConfig::new("chase", tag))
                        .expect("attach");
                }
                b.iter(|| black_box(host.tick(&mut world, 1.0 / 60.0)));
                host.shutdown(&world);
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_symbol_resolution,
    bench_entity_lookup,
    bench_string_codec,
    bench_host_tick
);
criterion_main!(benches);
