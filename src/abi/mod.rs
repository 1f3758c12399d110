//! 宿主与原生模块之间的二进制协议
//!
//! 所有类型均为`#[repr(C)]`顺序布局。模块作者使用同一套类型导出入口点：
//!
//! ```ignore
//! use native_bridge::abi::{FrameContext, HostApi, StatusCode};
//!
//! #[no_mangle]
//! pub unsafe extern "C" fn update<'a>(mut ctx: FrameContext<'a>, host: *const HostApi) -> FrameContext<'a> {
//!     if let Some(host) = host.as_ref() {
//!         let player = host.find_entity("Player");
//!         ctx.transform.position = player.transform.position;
//!     }
//!     ctx
//! }
//! ```

pub mod contract;
pub mod frame;
pub mod math;
pub mod string;

pub use contract::{
    AbiVersionEntry, Destroy, DestroyEntry, EntryPoint, EntrySignature, RawSymbol, Start,
    StartEntry, Update, UpdateEntry, ABI_VERSION, ABI_VERSION_SYMBOL,
};
pub use frame::{
    ClockSnapshot, EntityRef, FindEntityFn, FrameContext, HostApi, LogFn, LoggingSink, StatusCode,
};
pub use math::{Quaternion, TransformData, Vector3};
pub use string::{BoundaryStringCodec, TagString};
