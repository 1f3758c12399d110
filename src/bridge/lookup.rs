//! 实体查找缓存
//!
//! 标签到宿主实体的缓存，容忍失效：命中时先确认实体仍然存活且仍带着该标签，失效则重新查询；
//! "未找到"的结果也会缓存，但下次查找时仍会重试，因为实体可能稍后出现。
//!
//! 该缓存在原生调用进行中被回调重入使用，只在宿主的单线程上访问，不需要加锁。

use crate::abi::TransformData;
use crate::core::BridgeError;
use std::collections::HashMap;

/// 宿主实体的不透明标识，0保留为"无"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub u64);

/// 宿主实体注册表
pub trait EntityRegistry {
    /// 按标签查询实体
    fn find_by_tag(&self, tag: &str) -> Option<EntityId>;

    /// 实体是否仍然存活
    fn is_alive(&self, id: EntityId) -> bool;

    /// 实体当前的变换
    fn transform(&self, id: EntityId) -> Option<TransformData>;

    /// 实体当前是否带有该标签
    fn has_tag(&self, id: EntityId, tag: &str) -> bool;
}

/// 没有任何实体的注册表，宿主世界已不可用时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntities;

impl EntityRegistry for NoEntities {
    fn find_by_tag(&self, _tag: &str) -> Option<EntityId> {
        None
    }

    fn is_alive(&self, _id: EntityId) -> bool {
        false
    }

    fn transform(&self, _id: EntityId) -> Option<TransformData> {
        None
    }

    fn has_tag(&self, _id: EntityId, _tag: &str) -> bool {
        false
    }
}

/// 查找到的存活实体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedEntity {
    pub id: EntityId,
    pub transform: TransformData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheEntry {
    Found(EntityId),
    Missing,
}

/// 查找统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub hits: u64,
    pub misses: u64,
    /// 缓存项失效后的刷新次数
    pub refreshes: u64,
    /// 对注册表的按标签查询次数
    pub registry_queries: u64,
    pub not_found: u64,
}

/// 实体查找缓存
#[derive(Debug)]
pub struct EntityLookupCache {
    entries: HashMap<String, CacheEntry>,
    stats: LookupStats,
}

crate::impl_default_and_new!(EntityLookupCache {
    entries: HashMap::new(),
    stats: LookupStats::default(),
});

impl EntityLookupCache {
    /// 按标签查找实体
    ///
    /// 返回`None`时已记录警告，调用方应回退到零值实体。
    pub fn lookup(&mut self, tag: &str, registry: &dyn EntityRegistry) -> Option<ResolvedEntity> {
        match self.entries.get(tag).copied() {
            Some(CacheEntry::Found(id)) => {
                if registry.is_alive(id) && registry.has_tag(id, tag) {
                    if let Some(transform) = registry.transform(id) {
                        self.stats.hits += 1;
                        return Some(ResolvedEntity { id, transform });
                    }
                }
                self.stats.refreshes += 1;
                tracing::debug!(
                    target: "native_bridge::lookup",
                    "{}, refreshing",
                    BridgeError::StaleEntityReference {
                        tag: tag.to_string()
                    }
                );
            }
            Some(CacheEntry::Missing) | None => {
                self.stats.misses += 1;
            }
        }

        self.query(tag, registry)
    }

    fn query(&mut self, tag: &str, registry: &dyn EntityRegistry) -> Option<ResolvedEntity> {
        self.stats.registry_queries += 1;
        let resolved = registry.find_by_tag(tag).and_then(|id| {
            registry
                .transform(id)
                .map(|transform| ResolvedEntity { id, transform })
        });

        let entry = match resolved {
            Some(found) => CacheEntry::Found(found.id),
            None => {
                self.stats.not_found += 1;
                tracing::warn!(
                    target: "native_bridge::lookup",
                    "Tag -> {} was not found. Falling back to default transform.",
                    tag
                );
                CacheEntry::Missing
            }
        };

        match self.entries.get_mut(tag) {
            Some(existing) => *existing = entry,
            None => {
                self.entries.insert(tag.to_string(), entry);
            }
        }

        resolved
    }

    /// 预先写入一个已知的标签 → 实体映射
    pub fn seed(&mut self, tag: &str, id: EntityId) {
        self.entries.insert(tag.to_string(), CacheEntry::Found(id));
    }

    pub fn invalidate(&mut self, tag: &str) -> bool {
        self.entries.remove(tag).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> LookupStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{Quaternion, Vector3};
    use std::cell::{Cell, RefCell};

    /// 记录查询次数的注册表
    #[derive(Default)]
    struct CountingRegistry {
        entities: RefCell<HashMap<u64, (String, TransformData)>>,
        queries: Cell<u32>,
    }

    impl CountingRegistry {
        fn spawn(&self, id: u64, tag: &str, x: f32) {
            let transform = TransformData::new(Vector3::new(x, 0.0, 0.0), Quaternion::IDENTITY);
            self.entities
                .borrow_mut()
                .insert(id, (tag.to_string(), transform));
        }

        fn despawn(&self, id: u64) {
            self.entities.borrow_mut().remove(&id);
        }

        fn retag(&self, id: u64, tag: &str) {
            if let Some((t, _)) = self.entities.borrow_mut().get_mut(&id) {
                *t = tag.to_string();
            }
        }
    }

    impl EntityRegistry for CountingRegistry {
        fn find_by_tag(&self, tag: &str) -> Option<EntityId> {
            self.queries.set(self.queries.get() + 1);
            self.entities
                .borrow()
                .iter()
                .find(|(_, (t, _))| t == tag)
                .map(|(id, _)| EntityId(*id))
        }

        fn is_alive(&self, id: EntityId) -> bool {
            self.entities.borrow().contains_key(&id.0)
        }

        fn transform(&self, id: EntityId) -> Option<TransformData> {
            self.entities.borrow().get(&id.0).map(|(_, t)| *t)
        }

        fn has_tag(&self, id: EntityId, tag: &str) -> bool {
            self.entities.borrow().get(&id.0).is_some_and(|(t, _)| t == tag)
        }
    }

    #[test]
    fn test_miss_then_hit_queries_once() {
        let registry = CountingRegistry::default();
        registry.spawn(1, "Player", 3.0);
        let mut cache = EntityLookupCache::new();

        let first = cache.lookup("Player", &registry).unwrap();
        assert_eq!(registry.queries.get(), 1);
        let second = cache.lookup("Player", &registry).unwrap();
        assert_eq!(registry.queries.get(), 1);

        assert_eq!(first.id, second.id);
        assert_eq!(second.transform.position.x, 3.0);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_hit_reflects_current_transform() {
        let registry = CountingRegistry::default();
        registry.spawn(1, "Player", 1.0);
        let mut cache = EntityLookupCache::new();
        cache.lookup("Player", &registry);

        registry.spawn(1, "Player", 9.0);
        let hit = cache.lookup("Player", &registry).unwrap();
        assert_eq!(hit.transform.position.x, 9.0);
        assert_eq!(registry.queries.get(), 1);
    }

    #[test]
    fn test_stale_entry_is_refreshed() {
        let registry = CountingRegistry::default();
        registry.spawn(1, "Enemy", 1.0);
        let mut cache = EntityLookupCache::new();
        assert_eq!(cache.lookup("Enemy", &registry).unwrap().id, EntityId(1));

        registry.despawn(1);
        registry.spawn(2, "Enemy", 2.0);

        let refreshed = cache.lookup("Enemy", &registry).unwrap();
        assert_eq!(refreshed.id, EntityId(2));
        assert_eq!(cache.stats().refreshes, 1);
        assert_eq!(registry.queries.get(), 2);
    }

    #[test]
    fn test_retagged_entity_is_not_served_under_old_tag() {
        let registry = CountingRegistry::default();
        registry.spawn(1, "Player", 1.0);
        let mut cache = EntityLookupCache::new();
        assert_eq!(cache.lookup("Player", &registry).unwrap().id, EntityId(1));

        registry.retag(1, "Ghost");
        assert!(cache.lookup("Player", &registry).is_none());
        assert_eq!(cache.stats().refreshes, 1);

        registry.spawn(2, "Player", 2.0);
        assert_eq!(cache.lookup("Player", &registry).unwrap().id, EntityId(2));
        assert_eq!(cache.lookup("Ghost", &registry).unwrap().id, EntityId(1));
    }

    #[test]
    fn test_not_found_is_retried_later() {
        let registry = CountingRegistry::default();
        let mut cache = EntityLookupCache::new();

        assert!(cache.lookup("Player", &registry).is_none());
        assert!(cache.contains("Player"));
        assert_eq!(cache.stats().not_found, 1);

        registry.spawn(5, "Player", 4.0);
        let found = cache.lookup("Player", &registry).unwrap();
        assert_eq!(found.id, EntityId(5));
        assert_eq!(registry.queries.get(), 2);
    }

    #[test]
    fn test_seed_skips_registry_query() {
        let registry = CountingRegistry::default();
        registry.spawn(8, "Self", 0.5);
        let mut cache = EntityLookupCache::new();
        cache.seed("Self", EntityId(8));

        assert_eq!(cache.lookup("Self", &registry).unwrap().id, EntityId(8));
        assert_eq!(registry.queries.get(), 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let registry = CountingRegistry::default();
        registry.spawn(1, "A", 0.0);
        let mut cache = EntityLookupCache::new();
        cache.lookup("A", &registry);
        assert!(cache.invalidate("A"));
        assert!(!cache.invalidate("A"));

        cache.lookup("A", &registry);
        assert_eq!(registry.queries.get(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_no_entities_registry() {
        let mut cache = EntityLookupCache::new();
        assert!(cache.lookup("anything", &NoEntities).is_none());
    }
}
