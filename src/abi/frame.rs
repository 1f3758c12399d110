//! 每帧负载
//!
//! `FrameContext`按值传入并传回每个入口点。字段顺序固定，
//! 任何布局变化都是协议的破坏性版本变更（见[`ABI_VERSION`](super::ABI_VERSION)）。

use super::math::TransformData;
use super::string::TagString;
use bytemuck::{Pod, Zeroable};
use std::ffi::c_void;
use std::fmt;

/// 时钟快照
///
/// 字段顺序即协议顺序。宿主只回写`fixed_delta_time`和`time_scale`，
/// 其余字段对原生代码是只读的。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ClockSnapshot {
    pub delta_time: f32,
    pub fixed_delta_time: f32,
    pub fixed_time: f32,
    pub fixed_unscaled_delta_time: f32,
    pub fixed_unscaled_time: f32,
    pub frame_count: f32,
    pub maximum_delta_time: f32,
    pub maximum_particle_delta_time: f32,
    pub real_time_since_startup: f32,
    pub smooth_delta_time: f32,
    pub time: f32,
    pub time_scale: f32,
    pub time_since_level_load: f32,
    pub unscaled_delta_time: f32,
    pub unscaled_time: f32,
}

/// 宿主实体的轻量快照
///
/// `tag`借用宿主缓冲区，只读且不可保留。`handle`是宿主实体的不透明标识，0表示无。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityRef<'a> {
    pub tag: TagString<'a>,
    pub transform: TransformData,
    pub handle: u64,
}

impl<'a> EntityRef<'a> {
    /// 零值实体，查找失败时返回
    pub fn empty(tag: TagString<'a>) -> Self {
        Self {
            tag,
            transform: TransformData::zeroed(),
            handle: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handle == 0
    }
}

/// 日志回调
pub type LogFn = for<'m> unsafe extern "C" fn(TagString<'m>);

/// 日志槽位（info/warn/error），空槽表示宿主未提供
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct LoggingSink {
    pub info: Option<LogFn>,
    pub warn: Option<LogFn>,
    pub error: Option<LogFn>,
}

impl LoggingSink {
    /// 全部为空的日志槽
    pub const DISABLED: LoggingSink = LoggingSink {
        info: None,
        warn: None,
        error: None,
    };

    pub fn is_enabled(&self) -> bool {
        self.info.is_some() || self.warn.is_some() || self.error.is_some()
    }

    pub fn info(&self, message: &str) {
        Self::emit(self.info, message);
    }

    pub fn warn(&self, message: &str) {
        Self::emit(self.warn, message);
    }

    pub fn error(&self, message: &str) {
        Self::emit(self.error, message);
    }

    fn emit(slot: Option<LogFn>, message: &str) {
        if let Some(log) = slot {
            // 消息缓冲区在回调期间保持有效
            unsafe { log(TagString::borrowed(message)) }
        }
    }
}

impl fmt::Debug for LoggingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingSink")
            .field("info", &self.info.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// 每次调用交换的负载
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContext<'a> {
    pub transform: TransformData,
    pub entity: EntityRef<'a>,
    pub clock: ClockSnapshot,
    pub log: LoggingSink,
}

/// 按标签查找宿主实体的回调
pub type FindEntityFn =
    for<'t> unsafe extern "C" fn(context: *mut c_void, tag: TagString<'t>) -> EntityRef<'t>;

/// 宿主接口
///
/// 作为入口点的第二个参数传入，只在该次调用期间有效，原生代码不得保留指针。
#[repr(C)]
pub struct HostApi {
    pub abi_version: u32,
    pub context: *mut c_void,
    pub find_entity_by_tag: Option<FindEntityFn>,
}

impl HostApi {
    /// 原生侧辅助：按标签查找实体，未提供回调时返回零值实体
    ///
    /// # Safety
    ///
    /// `self`必须是宿主在当前调用中传入的`HostApi`。
    pub unsafe fn find_entity<'t>(&self, tag: &'t str) -> EntityRef<'t> {
        let tag = TagString::borrowed(tag);
        match self.find_entity_by_tag {
            Some(find) => find(self.context, tag),
            None => EntityRef::empty(tag),
        }
    }
}

impl fmt::Debug for HostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostApi")
            .field("abi_version", &self.abi_version)
            .field("context", &self.context)
            .field("find_entity_by_tag", &self.find_entity_by_tag.is_some())
            .finish()
    }
}

/// 销毁入口的返回码，0表示成功
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}
