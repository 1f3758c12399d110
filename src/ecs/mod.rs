//! 宿主场景组件
//!
//! 原生行为附着在带[`Tag`]和[`Transform`]的实体上；[`WorldEntityRegistry`]
//! 让查找回调在`World`中按标签找到实体。

use crate::abi::{Quaternion, TransformData, Vector3};
use crate::bridge::{EntityId, EntityRegistry};
use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};

#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            rot: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(pos: Vec3) -> Self {
        Self {
            pos,
            ..Default::default()
        }
    }

    /// 边界上的位置和旋转，缩放不跨越边界
    pub fn to_data(&self) -> TransformData {
        TransformData::new(Vector3::from(self.pos), Quaternion::from(self.rot))
    }

    /// 写回原生代码返回的位置和旋转，保留缩放
    pub fn apply_data(&mut self, data: TransformData) {
        self.pos = data.position.into();
        let rot = Quat::from(data.rotation);
        self.rot = if rot.length_squared() > f32::EPSILON {
            rot.normalize()
        } else {
            Quat::IDENTITY
        };
    }
}

/// 实体标签，查找回调按此匹配
#[derive(Component, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub String);

impl Tag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 标记实体挂载了原生行为
#[derive(Component, Clone, Debug)]
pub struct NativeBehavior {
    pub module: String,
}

/// 实体到边界标识的转换，`Entity`的位表示永不为0
pub fn entity_id(entity: Entity) -> EntityId {
    EntityId(entity.to_bits())
}

pub fn entity_from_id(id: EntityId) -> Option<Entity> {
    Entity::try_from_bits(id.0).ok()
}

/// 基于`World`的实体注册表
///
/// 多个实体共享同一标签时返回索引最小的那个。
pub struct WorldEntityRegistry<'w> {
    world: &'w World,
}

impl<'w> WorldEntityRegistry<'w> {
    pub fn new(world: &'w World) -> Self {
        Self { world }
    }
}

impl EntityRegistry for WorldEntityRegistry<'_> {
    fn find_by_tag(&self, tag: &str) -> Option<EntityId> {
        self.world
            .iter_entities()
            .filter(|entity| entity.get::<Tag>().is_some_and(|t| t.0 == tag))
            .map(|entity| entity.id())
            .min_by_key(|entity| entity.index())
            .map(entity_id)
    }

    fn is_alive(&self, id: EntityId) -> bool {
        entity_from_id(id).is_some_and(|entity| self.world.get_entity(entity).is_some())
    }

    fn transform(&self, id: EntityId) -> Option<TransformData> {
        let entity = entity_from_id(id)?;
        self.world.get::<Transform>(entity).map(Transform::to_data)
    }

    fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        entity_from_id(id)
            .and_then(|entity| self.world.get::<Tag>(entity))
            .is_some_and(|t| t.0 == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EntityLookupCache;

    #[test]
    fn test_component_insertion() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();

        world
            .entity_mut(entity)
            .insert((Transform::default(), Tag::new("Player")));
        assert!(world.get::<Transform>(entity).is_some());
        assert_eq!(world.get::<Tag>(entity).map(Tag::as_str), Some("Player"));
    }

    #[test]
    fn test_registry_finds_by_tag() {
        let mut world = World::new();
        world.spawn((Transform::default(), Tag::new("Enemy")));
        let player = world
            .spawn((Transform::from_position(Vec3::new(1.0, 2.0, 3.0)), Tag::new("Player")))
            .id();

        let registry = WorldEntityRegistry::new(&world);
        let id = registry.find_by_tag("Player").unwrap();
        assert_eq!(id, entity_id(player));
        assert!(registry.is_alive(id));
        assert_eq!(
            registry.transform(id).unwrap().position,
            Vector3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(registry.find_by_tag("Ghost"), None);
    }

    #[test]
    fn test_despawned_entity_is_not_alive() {
        let mut world = World::new();
        let player = world.spawn((Transform::default(), Tag::new("Player"))).id();
        let id = entity_id(player);
        world.despawn(player);

        let registry = WorldEntityRegistry::new(&world);
        assert!(!registry.is_alive(id));
        assert_eq!(registry.transform(id), None);
        assert_eq!(registry.find_by_tag("Player"), None);
    }

    #[test]
    fn test_retagged_entity_leaves_lookup_cache() {
        let mut world = World::new();
        let player = world.spawn((Transform::default(), Tag::new("Player"))).id();
        let mut cache = EntityLookupCache::new();

        let found = cache.lookup("Player", &WorldEntityRegistry::new(&world));
        assert_eq!(found.map(|e| e.id), Some(entity_id(player)));

        world.entity_mut(player).insert(Tag::new("Ghost"));
        let registry = WorldEntityRegistry::new(&world);
        assert!(registry.has_tag(entity_id(player), "Ghost"));
        assert!(!registry.has_tag(entity_id(player), "Player"));
        assert!(cache.lookup("Player", &registry).is_none());
        assert_eq!(cache.stats().refreshes, 1);
    }

    #[test]
    fn test_apply_data_keeps_scale() {
        let mut transform = Transform {
            scale: Vec3::splat(2.0),
            ..Default::default()
        };
        transform.apply_data(TransformData::new(
            Vector3::new(4.0, 0.0, 0.0),
            Quaternion::IDENTITY,
        ));
        assert_eq!(transform.pos, Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(transform.scale, Vec3::splat(2.0));
        assert_ne!(entity_id(Entity::from_raw(0)).0, 0);
    }
}
