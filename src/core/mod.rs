//! 核心模块
//!
//! - `error` - 错误类型定义
//! - `logging` - 日志初始化
//! - `macros` - 通用宏

pub mod error;
pub mod logging;
#[macro_use]
pub mod macros;

pub use error::{BridgeError, BridgeResult, ConfigError, ConfigResult, EncodingError};
pub use logging::init_logging;
