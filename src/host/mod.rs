//! 行为宿主
//!
//! [`BehaviorHost`]持有一个模块池和解析器，把[`FrameBridge`]实例绑定到
//! `World`中的实体，并每帧驱动它们。
//!
//! # 示例
//!
//! ```no_run
//! use bevy_ecs::prelude::*;
//! use native_bridge::config::{BehaviorConfig, ModuleSearchConfig};
//! use native_bridge::ecs::{Tag, Transform};
//! use native_bridge::host::BehaviorHost;
//!
//! let mut world = World::new();
//! let follower = world.spawn((Transform::default(), Tag::new("Follower"))).id();
//!
//! let mut host = BehaviorHost::from_config(&ModuleSearchConfig::default());
//! if let Err(e) = host.attach(&mut world, follower, BehaviorConfig::new("follow_player", "Follower")) {
//!     eprintln!("behavior disabled: {e}");
//! }
//! for _ in 0..60 {
//!     host.tick(&mut world, 1.0 / 60.0);
//! }
//! host.shutdown(&world);
//! ```

pub mod clock;

pub use clock::FrameClock;

use crate::abi::{StatusCode, TransformData};
use crate::bridge::{
    DylibLoader, EntityRegistry, FrameBridge, FrameInput, FrameOutcome, FunctionResolver,
    ModulePool, NoEntities, PoolStats, SearchPathLocator,
};
use crate::config::{BehaviorConfig, BridgeConfig, ModuleSearchConfig};
use crate::core::{BridgeError, BridgeResult};
use crate::ecs::{entity_from_id, entity_id, NativeBehavior, Tag, Transform, WorldEntityRegistry};
use bevy_ecs::prelude::*;

struct AttachedBehavior {
    entity: Entity,
    bridge: FrameBridge,
}

/// 行为宿主
pub struct BehaviorHost {
    pool: ModulePool,
    resolver: FunctionResolver,
    instances: Vec<AttachedBehavior>,
}

impl BehaviorHost {
    pub fn new(pool: ModulePool, resolver: FunctionResolver) -> Self {
        Self {
            pool,
            resolver,
            instances: Vec::new(),
        }
    }

    /// 使用系统动态库加载器和配置的搜索路径
    pub fn from_config(config: &ModuleSearchConfig) -> Self {
        let pool = ModulePool::new(DylibLoader, SearchPathLocator::new(config.search_paths.clone()));
        let resolver = FunctionResolver::new().with_strict_abi(config.strict_abi);
        Self::new(pool, resolver)
    }

    /// 把行为附着到实体并加载其模块
    ///
    /// 加载失败时实例仍被登记但处于惰性状态，宿主继续运行。
    pub fn attach(&mut self, world: &mut World, entity: Entity, config: BehaviorConfig) -> BridgeResult<()> {
        let Some(mut entity_mut) = world.get_entity_mut(entity) else {
            return Err(BridgeError::StaleEntityReference {
                tag: config.entity_tag,
            });
        };
        if !entity_mut.contains::<Tag>() {
            entity_mut.insert(Tag::new(config.entity_tag.clone()));
        }
        if !entity_mut.contains::<Transform>() {
            entity_mut.insert(Transform::default());
        }
        entity_mut.insert(NativeBehavior {
            module: config.module.clone(),
        });

        tracing::info!(
            target: "native_bridge::host",
            "Attaching behavior '{}' to '{}'",
            config.module,
            config.entity_tag
        );

        let mut bridge = FrameBridge::new(config);
        let loaded = bridge.load(&mut self.pool, &mut self.resolver);
        self.instances.push(AttachedBehavior { entity, bridge });
        loaded
    }

    /// 推进时钟并驱动所有实例一帧
    ///
    /// 实体已被销毁的实例先行拆除。返回本帧出错的实例数。
    pub fn tick(&mut self, world: &mut World, raw_dt: f32) -> usize {
        world
            .get_resource_or_insert_with(FrameClock::default)
            .advance(raw_dt);

        self.reap_despawned(world);

        let mut failures = 0;
        for instance in self.instances.iter_mut() {
            let result = {
                let world: &World = world;
                let registry = WorldEntityRegistry::new(world);
                let input = frame_input(world, &registry, instance.entity, instance.bridge.last_transform());
                instance.bridge.tick(&self.pool, input)
            };

            match result {
                Ok(Some(outcome)) => apply_outcome(world, instance.entity, &outcome),
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        target: "native_bridge::host",
                        "Behavior '{}' on '{}' failed: {}",
                        instance.bridge.config().module,
                        instance.bridge.entity_tag(),
                        e
                    );
                }
            }
        }
        failures
    }

    fn reap_despawned(&mut self, world: &World) {
        let (dead, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.instances)
            .into_iter()
            .partition(|instance| world.get_entity(instance.entity).is_none());
        self.instances = alive;

        for mut instance in dead {
            tracing::debug!(
                target: "native_bridge::host",
                "Entity for behavior '{}' was despawned",
                instance.bridge.config().module
            );
            let result = teardown(&mut self.pool, &mut self.resolver, &mut instance, world);
            log_teardown(&instance, &result);
        }
    }

    /// 拆除实体上的所有行为，返回各实例的销毁返回码
    pub fn detach(&mut self, world: &mut World, entity: Entity) -> Vec<BridgeResult<Option<StatusCode>>> {
        let (detached, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.instances)
            .into_iter()
            .partition(|instance| instance.entity == entity);
        self.instances = kept;

        let results = detached
            .into_iter()
            .map(|mut instance| {
                let result = teardown(&mut self.pool, &mut self.resolver, &mut instance, world);
                log_teardown(&instance, &result);
                result
            })
            .collect();

        if let Some(mut entity_mut) = world.get_entity_mut(entity) {
            entity_mut.remove::<NativeBehavior>();
        }
        results
    }

    /// 拆除所有实例并卸载全部模块
    pub fn shutdown(&mut self, world: &World) {
        for mut instance in std::mem::take(&mut self.instances) {
            let result = teardown(&mut self.pool, &mut self.resolver, &mut instance, world);
            log_teardown(&instance, &result);
        }
        self.pool.unload_all();
        tracing::info!(target: "native_bridge::host", "Behavior host shut down");
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn inert_count(&self) -> usize {
        self.instances.iter().filter(|i| i.bridge.is_inert()).count()
    }

    /// 实体上附着的行为
    pub fn behaviors_on(&self, entity: Entity) -> impl Iterator<Item = &FrameBridge> {
        self.instances
            .iter()
            .filter(move |i| i.entity == entity)
            .map(|i| &i.bridge)
    }

    pub fn pool(&self) -> &ModulePool {
        &self.pool
    }

    pub fn resolver(&self) -> &FunctionResolver {
        &self.resolver
    }
}

impl Drop for BehaviorHost {
    fn drop(&mut self) {
        if self.instances.is_empty() {
            return;
        }
        tracing::warn!(
            target: "native_bridge::host",
            "Behavior host dropped with {} live instance(s), tearing down without a world",
            self.instances.len()
        );
        for mut instance in std::mem::take(&mut self.instances) {
            let input = FrameInput {
                transform: instance.bridge.last_transform(),
                clock: FrameClock::default().snapshot(),
                registry: &NoEntities,
                self_entity: Some(entity_id(instance.entity)),
            };
            let result = instance
                .bridge
                .destroy(&mut self.pool, &mut self.resolver, input);
            log_teardown(&instance, &result);
        }
    }
}

fn frame_input<'w>(
    world: &'w World,
    registry: &'w WorldEntityRegistry<'w>,
    entity: Entity,
    fallback: TransformData,
) -> FrameInput<'w> {
    FrameInput {
        transform: world
            .get::<Transform>(entity)
            .map(Transform::to_data)
            .unwrap_or(fallback),
        clock: world
            .get_resource::<FrameClock>()
            .map(FrameClock::snapshot)
            .unwrap_or_default(),
        registry,
        self_entity: world.get_entity(entity).map(|e| entity_id(e.id())),
    }
}

fn teardown(
    pool: &mut ModulePool,
    resolver: &mut FunctionResolver,
    instance: &mut AttachedBehavior,
    world: &World,
) -> BridgeResult<Option<StatusCode>> {
    let registry = WorldEntityRegistry::new(world);
    let input = frame_input(world, &registry, instance.entity, instance.bridge.last_transform());
    instance.bridge.destroy(pool, resolver, input)
}

fn log_teardown(instance: &AttachedBehavior, result: &BridgeResult<Option<StatusCode>>) {
    if let Err(e) = result {
        tracing::error!(
            target: "native_bridge::host",
            "Teardown of '{}' on '{}' failed: {}",
            instance.bridge.config().module,
            instance.bridge.entity_tag(),
            e
        );
    }
}

/// 把回写结果应用到`World`
fn apply_outcome(world: &mut World, entity: Entity, outcome: &FrameOutcome) {
    if let Some(data) = outcome.transform {
        if let Some(mut transform) = world.get_mut::<Transform>(entity) {
            transform.apply_data(data);
        }
    }
    if outcome.time_scale.is_some() || outcome.fixed_delta_time.is_some() {
        if let Some(mut clock) = world.get_resource_mut::<FrameClock>() {
            clock.apply(outcome);
        }
    }
    if let Some(tag) = &outcome.entity_tag {
        if let Some(mut entity_mut) = world.get_entity_mut(entity) {
            let changed = entity_mut.get::<Tag>().map_or(true, |current| current.0 != *tag);
            if changed {
                entity_mut.insert(Tag::new(tag.clone()));
            }
        }
    }
}

/// 一次模拟运行的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub ticks: u64,
    pub behaviors: usize,
    pub inert: usize,
    pub failed_ticks: usize,
    pub final_positions: Vec<(String, [f32; 3])>,
    pub pool: PoolStats,
}

/// 按配置搭建场景、附着行为并运行固定帧数
pub fn run_simulation(config: &BridgeConfig) -> BridgeResult<SimulationReport> {
    let host = BehaviorHost::from_config(&config.modules);
    run_simulation_with(config, host)
}

/// 使用给定宿主运行模拟，便于注入静态模块
pub fn run_simulation_with(config: &BridgeConfig, mut host: BehaviorHost) -> BridgeResult<SimulationReport> {
    config.validate()?;

    let mut world = World::new();
    world.insert_resource(FrameClock {
        fixed_delta_time: config.simulation.delta_time,
        ..Default::default()
    });

    for entity in &config.scene {
        world.spawn((
            Transform::from_position(entity.position.into()),
            Tag::new(entity.tag.clone()),
        ));
    }

    for behavior in &config.behaviors {
        let registry = WorldEntityRegistry::new(&world);
        let existing = registry
            .find_by_tag(&behavior.entity_tag)
            .and_then(entity_from_id);
        let entity = match existing {
            Some(entity) => entity,
            None => world
                .spawn((Transform::default(), Tag::new(behavior.entity_tag.clone())))
                .id(),
        };
        if let Err(e) = host.attach(&mut world, entity, behavior.clone()) {
            tracing::warn!(target: "native_bridge::host", "{}", e);
        }
    }

    let behaviors = host.instance_count();
    let inert = host.inert_count();
    tracing::info!(
        target: "native_bridge::host",
        "Running {} tick(s) with {} behavior(s), {} inert",
        config.simulation.ticks,
        behaviors,
        inert
    );

    let mut failed_ticks = 0;
    for _ in 0..config.simulation.ticks {
        failed_ticks += host.tick(&mut world, config.simulation.delta_time);
    }

    host.shutdown(&world);

    let mut final_positions: Vec<(String, [f32; 3])> = world
        .query::<(&Tag, &Transform)>()
        .iter(&world)
        .map(|(tag, transform)| (tag.0.clone(), transform.pos.to_array()))
        .collect();
    final_positions.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(SimulationReport {
        ticks: config.simulation.ticks,
        behaviors,
        inert,
        failed_ticks,
        final_positions,
        pool: host.pool().stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{FrameContext, HostApi, RawSymbol, Vector3};
    use crate::bridge::{
        IdentityLocator, NativeLibrary, NativeLoader, StaticModule, StaticModuleLoader,
    };
    use glam::Vec3;
    use std::cell::Cell;
    use std::path::Path;

    thread_local! {
        static DESTROYS: Cell<u32> = Cell::new(0);
        static CLOSES: Cell<u32> = Cell::new(0);
    }

    /// 记录卸载次数的静态模块加载器
    struct CountingLoader(StaticModuleLoader);

    struct CountingLibrary(Box<dyn NativeLibrary>);

    impl NativeLoader for CountingLoader {
        fn open(&mut self, path: &Path) -> Result<Box<dyn NativeLibrary>, String> {
            self.0
                .open(path)
                .map(|library| Box::new(CountingLibrary(library)) as Box<dyn NativeLibrary>)
        }
    }

    impl NativeLibrary for CountingLibrary {
        fn symbol(&self, name: &str) -> Option<RawSymbol> {
            self.0.symbol(name)
        }

        fn close(self: Box<Self>) -> Result<(), String> {
            CLOSES.with(|c| c.set(c.get() + 1));
            self.0.close()
        }
    }

    unsafe extern "C" fn chase<'a>(mut ctx: FrameContext<'a>, host: *const HostApi) -> FrameContext<'a> {
        let target = unsafe { (*host).find_entity("Player") };
        if !target.is_empty() {
            ctx.transform.position =
                Vector3::lerp(ctx.transform.position, target.transform.position, 0.5);
        }
        ctx
    }

    unsafe extern "C" fn slow_down<'a>(mut ctx: FrameContext<'a>, _host: *const HostApi) -> FrameContext<'a> {
        ctx.clock.time_scale = 0.25;
        ctx
    }

    unsafe extern "C" fn destroy(_ctx: FrameContext<'_>, _host: *const HostApi) -> StatusCode {
        DESTROYS.with(|c| c.set(c.get() + 1));
        StatusCode::OK
    }

    fn host() -> BehaviorHost {
        let loader = StaticModuleLoader::new()
            .with_module(
                "chase",
                StaticModule::new().with_update(chase).with_destroy(destroy),
            )
            .with_module(
                "slow",
                StaticModule::new().with_start(slow_down).with_destroy(destroy),
            );
        BehaviorHost::new(
            ModulePool::new(CountingLoader(loader), IdentityLocator),
            FunctionResolver::new(),
        )
    }

    #[test]
    fn test_tick_moves_follower_toward_player() {
        let mut world = World::new();
        world.spawn((
            Transform::from_position(Vec3::new(10.0, 0.0, 0.0)),
            Tag::new("Player"),
        ));
        let follower = world.spawn((Transform::default(), Tag::new("Follower"))).id();

        let mut host = host();
        host.attach(&mut world, follower, BehaviorConfig::new("chase", "Follower"))
            .unwrap();
        assert!(world.get::<NativeBehavior>(follower).is_some());

        assert_eq!(host.tick(&mut world, 1.0 / 60.0), 0);
        assert_eq!(world.get::<Transform>(follower).unwrap().pos.x, 5.0);
        host.tick(&mut world, 1.0 / 60.0);
        assert_eq!(world.get::<Transform>(follower).unwrap().pos.x, 7.5);

        host.shutdown(&world);
        assert_eq!(host.instance_count(), 0);
        assert!(host.pool().resident_modules().is_empty());
    }

    #[test]
    fn test_start_writes_back_time_scale() {
        let mut world = World::new();
        let entity = world.spawn((Transform::default(), Tag::new("Clock"))).id();
        let mut host = host();
        host.attach(&mut world, entity, BehaviorConfig::new("slow", "Clock"))
            .unwrap();
        host.tick(&mut world, 0.1);
        assert_eq!(world.resource::<FrameClock>().time_scale, 0.25);

        host.tick(&mut world, 0.1);
        assert!((world.resource::<FrameClock>().delta_time - 0.025).abs() < 1e-6);
        host.shutdown(&world);
    }

    #[test]
    fn test_missing_module_does_not_stop_host() {
        let mut world = World::new();
        let entity = world.spawn((Transform::default(), Tag::new("Follower"))).id();
        let mut host = host();

        assert!(host
            .attach(&mut world, entity, BehaviorConfig::new("ghost", "Follower"))
            .is_err());
        host.attach(&mut world, entity, BehaviorConfig::new("chase", "Follower"))
            .unwrap();
        assert_eq!(host.inert_count(), 1);
        assert_eq!(host.tick(&mut world, 0.1), 0);

        let results = host.detach(&mut world, entity);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(world.get::<NativeBehavior>(entity).is_none());
    }

    #[test]
    fn test_despawned_entity_is_torn_down() {
        let mut world = World::new();
        let entity = world.spawn((Transform::default(), Tag::new("Follower"))).id();
        let mut host = host();
        host.attach(&mut world, entity, BehaviorConfig::new("chase", "Follower"))
            .unwrap();
        host.tick(&mut world, 0.1);

        world.despawn(entity);
        host.tick(&mut world, 0.1);
        assert_eq!(host.instance_count(), 0);
        assert!(!host.pool().is_resident("chase"));
    }

    #[test]
    fn test_drop_tears_down_remaining_instances() {
        DESTROYS.with(|c| c.set(0));
        CLOSES.with(|c| c.set(0));
        let mut world = World::new();
        let first = world.spawn((Transform::default(), Tag::new("Follower"))).id();
        let second = world.spawn((Transform::default(), Tag::new("Follower"))).id();
        let clock = world.spawn((Transform::default(), Tag::new("Clock"))).id();
        let mut host = host();
        host.attach(&mut world, first, BehaviorConfig::new("chase", "Follower"))
            .unwrap();
        host.attach(&mut world, second, BehaviorConfig::new("chase", "Follower"))
            .unwrap();
        host.attach(&mut world, clock, BehaviorConfig::new("slow", "Clock"))
            .unwrap();
        host.tick(&mut world, 0.1);
        assert_eq!(host.instance_count(), 3);
        assert_eq!(DESTROYS.with(Cell::get), 0);
        assert_eq!(CLOSES.with(Cell::get), 0);

        drop(host);
        assert_eq!(DESTROYS.with(Cell::get), 3);
        // 两个模块各卸载一次
        assert_eq!(CLOSES.with(Cell::get), 2);
    }
}
