//! 入口点契约
//!
//! 原生模块以C调用约定导出以下符号：
//!
//! ```text
//! start(FrameContext, *const HostApi)   -> FrameContext   可选
//! update(FrameContext, *const HostApi)  -> FrameContext   可选
//! destroy(FrameContext, *const HostApi) -> StatusCode     必需
//! bridge_abi_version()                  -> u32            可选，用于版本握手
//! ```
//!
//! 签名由[`EntrySignature`]静态声明，不允许把任意符号转换为任意签名。

use super::frame::{FrameContext, HostApi, StatusCode};
use std::ffi::c_void;
use std::fmt;

/// 当前协议版本
///
/// 版本2：查找回调从`EntityRef`中移出，改为入口点的第二个参数。
pub const ABI_VERSION: u32 = 2;

/// 版本握手符号
pub const ABI_VERSION_SYMBOL: &str = "bridge_abi_version";

pub type StartEntry =
    for<'a> unsafe extern "C" fn(FrameContext<'a>, *const HostApi) -> FrameContext<'a>;
pub type UpdateEntry =
    for<'a> unsafe extern "C" fn(FrameContext<'a>, *const HostApi) -> FrameContext<'a>;
pub type DestroyEntry = for<'a> unsafe extern "C" fn(FrameContext<'a>, *const HostApi) -> StatusCode;
pub type AbiVersionEntry = unsafe extern "C" fn() -> u32;

/// 模块中导出符号的非空地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSymbol(*const c_void);

impl RawSymbol {
    pub fn new(ptr: *const c_void) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self(ptr))
        }
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0
    }
}

/// 生命周期入口点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    Start,
    Update,
    Destroy,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 3] = [EntryPoint::Start, EntryPoint::Update, EntryPoint::Destroy];

    pub fn symbol_name(&self) -> &'static str {
        match self {
            EntryPoint::Start => "start",
            EntryPoint::Update => "update",
            EntryPoint::Destroy => "destroy",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol_name())
    }
}

/// 入口点的静态签名
pub trait EntrySignature: Copy {
    const ENTRY: EntryPoint;

    /// # Safety
    ///
    /// `symbol`必须指向与该签名完全一致的函数。
    unsafe fn from_raw(symbol: RawSymbol) -> Self;
}

macro_rules! entry_signature {
    ($name:ident, $entry:expr, $fn_type:ty) => {
        #[derive(Clone, Copy)]
        pub struct $name(pub $fn_type);

        impl EntrySignature for $name {
            const ENTRY: EntryPoint = $entry;

            unsafe fn from_raw(symbol: RawSymbol) -> Self {
                $name(std::mem::transmute::<*const c_void, $fn_type>(symbol.as_ptr()))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:p})", stringify!($name), self.0 as *const c_void)
            }
        }
    };
}

entry_signature!(Start, EntryPoint::Start, StartEntry);
entry_signature!(Update, EntryPoint::Update, UpdateEntry);
entry_signature!(Destroy, EntryPoint::Destroy, DestroyEntry);

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn passthrough<'a>(ctx: FrameContext<'a>, _host: *const HostApi) -> FrameContext<'a> {
        ctx
    }

    #[test]
    fn test_symbol_names() {
        let names: Vec<_> = EntryPoint::ALL.iter().map(|e| e.symbol_name()).collect();
        assert_eq!(names, vec!["start", "update", "destroy"]);
        assert_eq!(Update::ENTRY, EntryPoint::Update);
    }

    #[test]
    fn test_null_symbol_rejected() {
        assert!(RawSymbol::new(std::ptr::null()).is_none());
    }

    #[test]
    fn test_from_raw_roundtrip_calls_function() {
        let raw = RawSymbol::new(passthrough as StartEntry as *const c_void).unwrap();
        let start = unsafe { Start::from_raw(raw) };
        let mut ctx = FrameContext::default();
        ctx.clock.time_scale = 0.5;
        let out = unsafe { (start.0)(ctx, std::ptr::null()) };
        assert_eq!(out.clock.time_scale, 0.5);
    }
}
