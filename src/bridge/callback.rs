//! 原生代码回调宿主的入口
//!
//! 查找回调通过[`HostApi`]显式注入，`context`指向栈上的[`CallScope`]，
//! 只在一次入口点调用期间有效。所有回调都在`catch_unwind`中执行，
//! 宿主侧的panic不会穿过原生边界。

use super::lookup::{EntityLookupCache, EntityRegistry};
use crate::abi::{
    BoundaryStringCodec, EntityRef, FindEntityFn, HostApi, LogFn, LoggingSink, TagString,
    ABI_VERSION,
};
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

/// 一次入口点调用期间暴露给原生代码的宿主状态
pub(crate) struct CallScope<'s> {
    cache: &'s mut EntityLookupCache,
    registry: &'s dyn EntityRegistry,
}

impl<'s> CallScope<'s> {
    pub(crate) fn new(cache: &'s mut EntityLookupCache, registry: &'s dyn EntityRegistry) -> Self {
        Self { cache, registry }
    }

    /// 构造指向本作用域的`HostApi`
    ///
    /// 返回值不得比`self`活得更久，也不得在此期间通过其他路径访问`self`。
    pub(crate) fn host_api(&mut self) -> HostApi {
        HostApi {
            abi_version: ABI_VERSION,
            context: self as *mut Self as *mut c_void,
            find_entity_by_tag: Some(find_entity_by_tag as FindEntityFn),
        }
    }

    fn find<'t>(&mut self, tag: TagString<'t>) -> EntityRef<'t> {
        // 入站标签借用自原生调用方，只在本次回调内读取
        let name = match unsafe { BoundaryStringCodec::decode_borrowed(tag) } {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(target: "native_bridge::lookup", "Rejected lookup tag: {}", e);
                return EntityRef::empty(tag);
            }
        };

        match self.cache.lookup(name, self.registry) {
            Some(found) => EntityRef {
                tag,
                transform: found.transform,
                handle: found.id.0,
            },
            None => EntityRef::empty(tag),
        }
    }
}

unsafe extern "C" fn find_entity_by_tag<'t>(context: *mut c_void, tag: TagString<'t>) -> EntityRef<'t> {
    if context.is_null() {
        return EntityRef::empty(tag);
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // context由CallScope::host_api产生，调用进行中独占
        let scope = unsafe { &mut *(context as *mut CallScope<'_>) };
        scope.find(tag)
    }));

    result.unwrap_or_else(|_| {
        tracing::error!(target: "native_bridge::lookup", "Host entity lookup panicked");
        EntityRef::empty(tag)
    })
}

/// 转发到tracing的日志槽
pub fn tracing_sink() -> LoggingSink {
    LoggingSink {
        info: Some(log_info as LogFn),
        warn: Some(log_warn as LogFn),
        error: Some(log_error as LogFn),
    }
}

fn forward(message: TagString<'_>, emit: fn(&str)) {
    let _ = panic::catch_unwind(|| {
        // 消息只在本次回调内有效，立即复制
        let text = unsafe { BoundaryStringCodec::decode_lossy(message) };
        emit(&text);
    });
}

unsafe extern "C" fn log_info(message: TagString<'_>) {
    forward(message, |text| tracing::info!(target: "native", "{}", text));
}

unsafe extern "C" fn log_warn(message: TagString<'_>) {
    forward(message, |text| tracing::warn!(target: "native", "{}", text));
}

unsafe extern "C" fn log_error(message: TagString<'_>) {
    forward(message, |text| tracing::error!(target: "native", "{}", text));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{Quaternion, TransformData, Vector3};
    use crate::bridge::lookup::{EntityId, NoEntities};

    struct OnePlayer;

    impl EntityRegistry for OnePlayer {
        fn find_by_tag(&self, tag: &str) -> Option<EntityId> {
            (tag == "Player").then_some(EntityId(42))
        }

        fn is_alive(&self, id: EntityId) -> bool {
            id == EntityId(42)
        }

        fn transform(&self, _id: EntityId) -> Option<TransformData> {
            Some(TransformData::new(Vector3::new(1.0, 2.0, 3.0), Quaternion::IDENTITY))
        }

        fn has_tag(&self, id: EntityId, tag: &str) -> bool {
            id == EntityId(42) && tag == "Player"
        }
    }

    struct PanickingRegistry;

    impl EntityRegistry for PanickingRegistry {
        fn find_by_tag(&self, _tag: &str) -> Option<EntityId> {
            panic!("registry unavailable")
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

    #[test]
    fn test_lookup_through_host_api() {
        let mut cache = EntityLookupCache::new();
        let registry = OnePlayer;
        let mut scope = CallScope::new(&mut cache, &registry);
        let api = scope.host_api();

        let found = unsafe { api.find_entity("Player") };
        assert_eq!(found.handle, 42);
        assert_eq!(found.transform.position.z, 3.0);
        assert_eq!(unsafe { BoundaryStringCodec::decode(found.tag) }.unwrap(), "Player");

        let missing = unsafe { api.find_entity("Ghost") };
        assert!(missing.is_empty());
        assert_eq!(missing.transform, TransformData::default());
    }

    #[test]
    fn test_repeated_lookups_in_one_call_share_cache() {
        let mut cache = EntityLookupCache::new();
        let registry = OnePlayer;
        {
            let mut scope = CallScope::new(&mut cache, &registry);
            let api = scope.host_api();
            for _ in 0..5 {
                assert_eq!(unsafe { api.find_entity("Player") }.handle, 42);
            }
        }
        assert_eq!(cache.stats().registry_queries, 1);
        assert_eq!(cache.stats().hits, 4);
    }

    #[test]
    fn test_panic_does_not_cross_boundary() {
        let mut cache = EntityLookupCache::new();
        let registry = PanickingRegistry;
        let mut scope = CallScope::new(&mut cache, &registry);
        let api = scope.host_api();
        let entity = unsafe { api.find_entity("Player") };
        assert!(entity.is_empty());
    }

    #[test]
    fn test_null_context_returns_empty() {
        let api = HostApi {
            abi_version: ABI_VERSION,
            context: std::ptr::null_mut(),
            find_entity_by_tag: Some(find_entity_by_tag as FindEntityFn),
        };
        assert!(unsafe { api.find_entity("Player") }.is_empty());

        let mut cache = EntityLookupCache::new();
        let mut scope = CallScope::new(&mut cache, &NoEntities);
        assert!(unsafe { scope.host_api().find_entity("Player") }.is_empty());
    }

    #[test]
    fn test_tracing_sink_accepts_messages() {
        let sink = tracing_sink();
        assert!(sink.is_enabled());
        sink.info("hello from native");
        sink.warn("careful");
        sink.error("broken");
    }
}
