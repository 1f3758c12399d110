//! 原生模块桥接
//!
//! - [`ModulePool`]：按名称引用计数的模块池
//! - [`FunctionResolver`]：把模块符号绑定为带类型的入口点
//! - [`EntityLookupCache`]：按标签缓存的实体查找
//! - [`FrameBridge`]：单个行为实例的生命周期编排

mod callback;
pub mod frame_bridge;
pub mod loader;
pub mod lookup;
pub mod pool;
pub mod resolver;

pub use callback::tracing_sink;
pub use frame_bridge::{
    BridgeState, FrameBridge, FrameInput, FrameOutcome, InertReason, MAX_FIXED_DELTA_TIME,
    MAX_TIME_SCALE, MIN_FIXED_DELTA_TIME,
};
pub use loader::{
    DylibLoader, IdentityLocator, ModuleLocator, NativeLibrary, NativeLoader, SearchPathLocator,
    StaticModule, StaticModuleLoader,
};
pub use lookup::{
    EntityId, EntityLookupCache, EntityRegistry, LookupStats, NoEntities, ResolvedEntity,
};
pub use pool::{ModuleHandle, ModuleId, ModulePool, PoolStats, UnloadOutcome};
pub use resolver::{FunctionBinding, FunctionResolver, Requirement, ResolverStats};
