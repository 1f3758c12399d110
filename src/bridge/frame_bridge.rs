//! 帧桥接
//!
//! 编排一个模块实例的生命周期：
//!
//! ```text
//! Unloaded → Loaded → Initialized → Running → Destroyed
//!               └──────(无start)──────┘
//! ```
//!
//! - `start`最多调用一次，且严格早于第一次`update`
//! - `update`每帧最多调用一次
//! - `destroy`最多调用一次，且严格晚于最后一次`update`
//!
//! 所有方法都接收`&mut self`，原生代码经回调无法重入同一实例的状态转换。

use super::callback::{self, CallScope};
use super::lookup::{EntityId, EntityLookupCache, EntityRegistry};
use super::pool::{ModuleHandle, ModulePool, UnloadOutcome};
use super::resolver::{FunctionBinding, FunctionResolver, Requirement};
use crate::abi::{
    BoundaryStringCodec, ClockSnapshot, Destroy, EntityRef, FrameContext, LoggingSink, Start,
    StatusCode, TransformData, Update,
};
use crate::config::{BehaviorConfig, FieldAuthority};
use crate::core::{BridgeError, BridgeResult};

/// 实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unloaded,
    Loaded,
    Initialized,
    Running,
    Destroyed,
}

impl BridgeState {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeState::Unloaded => "unloaded",
            BridgeState::Loaded => "loaded",
            BridgeState::Initialized => "initialized",
            BridgeState::Running => "running",
            BridgeState::Destroyed => "destroyed",
        }
    }
}

/// 实例被禁用的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InertReason {
    /// 模块加载或版本握手失败
    LoadFailed(String),
    /// 模块缺少必需的销毁入口
    MissingTeardown(&'static str),
}

/// 一次调用的宿主输入
#[derive(Clone, Copy)]
pub struct FrameInput<'a> {
    /// 实例所附着实体的当前变换
    pub transform: TransformData,
    /// 本帧时钟快照
    pub clock: ClockSnapshot,
    /// 实体注册表，供查找回调使用
    pub registry: &'a dyn EntityRegistry,
    /// 实例自身的实体
    pub self_entity: Option<EntityId>,
}

/// 可回写的`time_scale`上限
pub const MAX_TIME_SCALE: f32 = 100.0;
/// 可回写的`fixed_delta_time`范围
pub const MIN_FIXED_DELTA_TIME: f32 = 1.0e-4;
pub const MAX_FIXED_DELTA_TIME: f32 = 1.0;

/// 原生代码返回的、由宿主回写的字段
///
/// 只包含[`FieldAuthority`]允许且取值合法的字段，其余为`None`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub transform: Option<TransformData>,
    pub time_scale: Option<f32>,
    pub fixed_delta_time: Option<f32>,
    pub entity_tag: Option<String>,
}

impl FrameOutcome {
    pub fn is_empty(&self) -> bool {
        *self == FrameOutcome::default()
    }

    /// 合并后一次调用的结果，后者优先
    pub fn merge(&mut self, later: FrameOutcome) {
        if later.transform.is_some() {
            self.transform = later.transform;
        }
        if later.time_scale.is_some() {
            self.time_scale = later.time_scale;
        }
        if later.fixed_delta_time.is_some() {
            self.fixed_delta_time = later.fixed_delta_time;
        }
        if later.entity_tag.is_some() {
            self.entity_tag = later.entity_tag;
        }
    }

    /// 把结果应用到下一次调用的输入上
    pub fn apply_to(&self, input: &mut FrameInput<'_>) {
        if let Some(transform) = self.transform {
            input.transform = transform;
        }
        if let Some(time_scale) = self.time_scale {
            input.clock.time_scale = time_scale;
        }
        if let Some(fixed_delta_time) = self.fixed_delta_time {
            input.clock.fixed_delta_time = fixed_delta_time;
        }
    }
}

struct EntryBindings {
    start: Option<FunctionBinding<Start>>,
    update: Option<FunctionBinding<Update>>,
    destroy: FunctionBinding<Destroy>,
}

/// 单个行为实例的桥接
pub struct FrameBridge {
    config: BehaviorConfig,
    state: BridgeState,
    inert: Option<InertReason>,
    module: Option<ModuleHandle>,
    bindings: Option<EntryBindings>,
    lookup: EntityLookupCache,
    entity_tag: String,
    last_transform: TransformData,
    start_calls: u32,
    update_calls: u64,
}

impl FrameBridge {
    pub fn new(config: BehaviorConfig) -> Self {
        let entity_tag = config.entity_tag.clone();
        Self {
            config,
            state: BridgeState::Unloaded,
            inert: None,
            module: None,
            bindings: None,
            lookup: EntityLookupCache::new(),
            entity_tag,
            last_transform: TransformData::default(),
            start_calls: 0,
            update_calls: 0,
        }
    }

    /// `Unloaded → Loaded`：加载模块并绑定入口点
    ///
    /// 失败时实例变为惰性：之后的`tick`为空操作，宿主不受影响。
    pub fn load(&mut self, pool: &mut ModulePool, resolver: &mut FunctionResolver) -> BridgeResult<()> {
        if self.state != BridgeState::Unloaded || self.inert.is_some() {
            return Err(self.invalid("load"));
        }

        let handle = match pool.load(&self.config.module) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    target: "native_bridge::bridge",
                    "Disabling behavior '{}' on '{}': {}",
                    self.config.module,
                    self.entity_tag,
                    e
                );
                self.inert = Some(InertReason::LoadFailed(e.to_string()));
                return Err(e);
            }
        };

        match Self::bind_entries(pool, resolver, &handle) {
            Ok(bindings) => {
                tracing::debug!(
                    target: "native_bridge::bridge",
                    "Behavior '{}' loaded (start: {}, update: {})",
                    handle.name(),
                    bindings.start.is_some(),
                    bindings.update.is_some()
                );
                self.bindings = Some(bindings);
                self.module = Some(handle);
                self.state = BridgeState::Loaded;
                Ok(())
            }
            Err(e) => {
                self.inert = Some(match &e {
                    BridgeError::MissingRequiredEntryPoint { symbol, .. } => {
                        tracing::error!(
                            target: "native_bridge::bridge",
                            "CONFIGURATION DEFECT: {}; behavior on '{}' is disabled",
                            e,
                            self.entity_tag
                        );
                        InertReason::MissingTeardown(*symbol)
                    }
                    other => {
                        tracing::error!(target: "native_bridge::bridge", "{}", other);
                        InertReason::LoadFailed(other.to_string())
                    }
                });
                Self::release(pool, resolver, &handle);
                Err(e)
            }
        }
    }

    fn bind_entries(
        pool: &ModulePool,
        resolver: &mut FunctionResolver,
        handle: &ModuleHandle,
    ) -> BridgeResult<EntryBindings> {
        resolver.verify_abi(pool, handle)?;

        let start = resolver.bind::<Start>(pool, handle, Requirement::Optional)?;
        let update = resolver.bind::<Update>(pool, handle, Requirement::Optional)?;
        let destroy = resolver
            .bind::<Destroy>(pool, handle, Requirement::Required)
            .map_err(|e| match e {
                BridgeError::SymbolNotFound {
                    module,
                    symbol,
                    required: true,
                } => BridgeError::MissingRequiredEntryPoint { module, symbol },
                other => other,
            })?
            .ok_or_else(|| BridgeError::MissingRequiredEntryPoint {
                module: handle.name().to_string(),
                symbol: "destroy",
            })?;

        Ok(EntryBindings {
            start,
            update,
            destroy,
        })
    }

    fn release(pool: &mut ModulePool, resolver: &mut FunctionResolver, handle: &ModuleHandle) {
        if let UnloadOutcome::Unloaded(id) = pool.unload(handle.name()) {
            resolver.forget(id);
        }
    }

    /// `Loaded → Initialized`：调用一次`start`并回写结果
    ///
    /// 模块未导出`start`时直接进入`Running`。
    pub fn start(&mut self, pool: &ModulePool, input: FrameInput<'_>) -> BridgeResult<Option<FrameOutcome>> {
        if self.inert.is_some() {
            return Ok(None);
        }
        if self.state != BridgeState::Loaded {
            return Err(self.invalid("start"));
        }

        let Some(bindings) = self.bindings.as_ref() else {
            return Err(self.invalid("start"));
        };
        let Some(start) = bindings.start.as_ref() else {
            self.state = BridgeState::Running;
            return Ok(None);
        };

        let _span = tracing::debug_span!("native_call", module = %self.config.module, entry = "start")
            .entered();

        let ctx = build_context(&self.entity_tag, input, self.config.expose_logging_sink);
        let mut scope = CallScope::new(&mut self.lookup, input.registry);
        let api = scope.host_api();
        let returned = start.invoke(pool, ctx, &api)?;
        let outcome = extract_outcome(&self.config.authority, &returned);

        self.start_calls += 1;
        self.state = BridgeState::Initialized;
        self.absorb(&outcome, input.transform);

        // 用实例自身的标签预热查找缓存
        if let Some(id) = input.self_entity {
            if !self.entity_tag.is_empty() {
                self.lookup.seed(&self.entity_tag, id);
            }
        }

        Ok(Some(outcome))
    }

    /// 每帧调用
    ///
    /// 首帧会先执行`start`，并把其结果作为`update`的输入。模块未导出`update`时为空操作。
    pub fn tick(&mut self, pool: &ModulePool, mut input: FrameInput<'_>) -> BridgeResult<Option<FrameOutcome>> {
        if self.inert.is_some() {
            return Ok(None);
        }

        let mut combined = None;
        match self.state {
            BridgeState::Loaded => {
                if let Some(outcome) = self.start(pool, input)? {
                    outcome.apply_to(&mut input);
                    combined = Some(outcome);
                }
            }
            BridgeState::Initialized | BridgeState::Running => {}
            BridgeState::Unloaded | BridgeState::Destroyed => return Err(self.invalid("tick")),
        }

        let update = self
            .bindings
            .as_ref()
            .and_then(|bindings| bindings.update.as_ref());
        let Some(update) = update else {
            self.state = BridgeState::Running;
            return Ok(combined);
        };

        let _span = tracing::trace_span!("native_call", module = %self.config.module, entry = "update")
            .entered();

        let ctx = build_context(&self.entity_tag, input, self.config.expose_logging_sink);
        let mut scope = CallScope::new(&mut self.lookup, input.registry);
        let api = scope.host_api();
        let returned = update.invoke(pool, ctx, &api)?;
        let outcome = extract_outcome(&self.config.authority, &returned);

        self.update_calls += 1;
        self.state = BridgeState::Running;
        self.absorb(&outcome, input.transform);

        match combined.as_mut() {
            Some(first) => first.merge(outcome),
            None => combined = Some(outcome),
        }
        Ok(combined)
    }

    /// `Running → Destroyed`：调用一次`destroy`，然后释放模块引用
    ///
    /// 返回码只记录日志，不回滚之前已回写的状态。惰性实例不调用任何入口点；
    /// 因缺少销毁入口而惰性的实例返回[`BridgeError::MissingRequiredEntryPoint`]。
    pub fn destroy(
        &mut self,
        pool: &mut ModulePool,
        resolver: &mut FunctionResolver,
        input: FrameInput<'_>,
    ) -> BridgeResult<Option<StatusCode>> {
        if self.state == BridgeState::Destroyed {
            return Err(self.invalid("destroy"));
        }

        if let Some(reason) = &self.inert {
            self.state = BridgeState::Destroyed;
            return match reason {
                InertReason::MissingTeardown(symbol) => Err(BridgeError::MissingRequiredEntryPoint {
                    module: self.config.module.clone(),
                    symbol: *symbol,
                }),
                InertReason::LoadFailed(_) => Ok(None),
            };
        }

        let (Some(handle), Some(bindings)) = (self.module.take(), self.bindings.take()) else {
            // 从未加载过
            self.state = BridgeState::Destroyed;
            return Ok(None);
        };

        let status = {
            let _span =
                tracing::debug_span!("native_call", module = %handle.name(), entry = "destroy").entered();
            let ctx = build_context(&self.entity_tag, input, self.config.expose_logging_sink);
            let mut scope = CallScope::new(&mut self.lookup, input.registry);
            let api = scope.host_api();
            bindings.destroy.invoke(pool, ctx, &api)
        };

        // 无论destroy结果如何，实例都不再复用
        self.state = BridgeState::Destroyed;
        drop(bindings);
        Self::release(pool, resolver, &handle);
        self.lookup.clear();

        let status = status?;
        if status.is_ok() {
            tracing::debug!(target: "native_bridge::bridge", "Behavior '{}' destroyed", handle.name());
        } else {
            tracing::warn!(
                target: "native_bridge::bridge",
                "Behavior '{}' destroy returned status {}",
                handle.name(),
                status.0
            );
        }
        Ok(Some(status))
    }

    fn absorb(&mut self, outcome: &FrameOutcome, fallback: TransformData) {
        self.last_transform = outcome.transform.unwrap_or(fallback);
        if let Some(tag) = &outcome.entity_tag {
            if *tag != self.entity_tag {
                tracing::debug!(
                    target: "native_bridge::bridge",
                    "Behavior '{}' retagged '{}' -> '{}'",
                    self.config.module,
                    self.entity_tag,
                    tag
                );
                self.entity_tag.clone_from(tag);
            }
        }
    }

    fn invalid(&self, operation: &'static str) -> BridgeError {
        BridgeError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn inert_reason(&self) -> Option<&InertReason> {
        self.inert.as_ref()
    }

    pub fn is_inert(&self) -> bool {
        self.inert.is_some()
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    pub fn module(&self) -> Option<&ModuleHandle> {
        self.module.as_ref()
    }

    /// 实例当前的实体标签
    pub fn entity_tag(&self) -> &str {
        &self.entity_tag
    }

    /// 最近一次调用后的变换
    pub fn last_transform(&self) -> TransformData {
        self.last_transform
    }

    pub fn lookup_cache(&self) -> &EntityLookupCache {
        &self.lookup
    }

    pub fn start_invocations(&self) -> u32 {
        self.start_calls
    }

    pub fn update_invocations(&self) -> u64 {
        self.update_calls
    }
}

/// 构造本次调用的负载
///
/// 出站标签借用`tag`，只在本次调用期间有效。
fn build_context<'a>(tag: &'a str, input: FrameInput<'_>, expose_logging_sink: bool) -> FrameContext<'a> {
    FrameContext {
        transform: input.transform,
        entity: EntityRef {
            tag: BoundaryStringCodec::encode(tag),
            transform: input.transform,
            handle: input.self_entity.map_or(0, |id| id.0),
        },
        clock: input.clock,
        log: if expose_logging_sink {
            callback::tracing_sink()
        } else {
            LoggingSink::DISABLED
        },
    }
}

/// 按字段权限提取返回负载，非法取值被丢弃
fn extract_outcome(authority: &FieldAuthority, returned: &FrameContext<'_>) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();

    if authority.transform {
        let t = returned.transform;
        let values = [
            t.position.x,
            t.position.y,
            t.position.z,
            t.rotation.x,
            t.rotation.y,
            t.rotation.z,
            t.rotation.w,
        ];
        if values.iter().all(|v| v.is_finite()) {
            outcome.transform = Some(t);
        } else {
            tracing::warn!(target: "native_bridge::bridge", "Ignoring non-finite transform from native code");
        }
    }

    if authority.time_scale {
        let scale = returned.clock.time_scale;
        if scale.is_finite() && scale >= 0.0 {
            if scale > MAX_TIME_SCALE {
                tracing::warn!(target: "native_bridge::bridge", "Clamping time_scale {} to {}", scale, MAX_TIME_SCALE);
            }
            outcome.time_scale = Some(scale.min(MAX_TIME_SCALE));
        } else {
            tracing::warn!(target: "native_bridge::bridge", "Ignoring invalid time_scale {}", scale);
        }
    }

    if authority.fixed_delta_time {
        let step = returned.clock.fixed_delta_time;
        if step.is_finite() && step > 0.0 {
            let clamped = step.clamp(MIN_FIXED_DELTA_TIME, MAX_FIXED_DELTA_TIME);
            if clamped != step {
                tracing::warn!(target: "native_bridge::bridge", "Clamping fixed_delta_time {} to {}", step, clamped);
            }
            outcome.fixed_delta_time = Some(clamped);
        } else {
            tracing::warn!(target: "native_bridge::bridge", "Ignoring invalid fixed_delta_time {}", step);
        }
    }

    if authority.entity_tag {
        // 返回的标签可能指向原生内存，立即复制
        match unsafe { BoundaryStringCodec::decode(returned.entity.tag) } {
            Ok(tag) if tag.is_empty() => {}
            Ok(tag) => outcome.entity_tag = Some(tag),
            Err(e) => tracing::warn!(
                target: "native_bridge::bridge",
                "{}; keeping previous entity tag",
                BridgeError::Encoding(e)
            ),
        }
    }

    outcome
}
