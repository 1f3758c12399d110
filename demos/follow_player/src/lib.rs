//! 示例原生行为
//!
//! 启动时把实体抬高5个单位，之后每帧向标签为`Player`的实体靠近并缓慢旋转。

use native_bridge::abi::{FrameContext, HostApi, Quaternion, StatusCode, Vector3, ABI_VERSION};

/// 每秒靠近目标的比例
const FOLLOW_RATE: f32 = 2.0;
/// 每秒绕各轴旋转的弧度
const SPIN_RATE: f32 = 0.5;

#[no_mangle]
pub extern "C" fn bridge_abi_version() -> u32 {
    ABI_VERSION
}

#[no_mangle]
pub unsafe extern "C" fn start<'a>(mut ctx: FrameContext<'a>, _host: *const HostApi) -> FrameContext<'a> {
    ctx.transform.position = Vector3::translate(ctx.transform.position, Vector3::new(0.0, 5.0, 0.0));
    ctx.log.info("follow_player started");
    ctx
}

#[no_mangle]
pub unsafe extern "C" fn update<'a>(mut ctx: FrameContext<'a>, host: *const HostApi) -> FrameContext<'a> {
    let dt = ctx.clock.delta_time;

    if let Some(host) = unsafe { host.as_ref() } {
        // 标签只在本次回调内有效，这里只读取变换
        let player = unsafe { host.find_entity("Player") };
        if !player.is_empty() {
            let t = (FOLLOW_RATE * dt).clamp(0.0, 1.0);
            ctx.transform.position =
                Vector3::lerp(ctx.transform.position, player.transform.position, t);
        }
    }

    let spin = SPIN_RATE * dt;
    ctx.transform.rotation *= Quaternion::from_euler(spin, spin, spin);
    ctx
}

#[no_mangle]
pub unsafe extern "C" fn destroy(_ctx: FrameContext<'_>, _host: *const HostApi) -> StatusCode {
    StatusCode::OK
}
