//! 统一错误处理模块
//!
//! 提供桥接层范围内的统一错误类型定义
//!
//! ## 错误分级
//!
//! - **本地恢复**：可选入口缺失、实体引用失效、重复卸载，只记录日志
//! - **实例级失败**：模块未找到、必需入口缺失，禁用对应实例但不影响宿主
//!
//! 任何错误都不会以语言级异常的形式穿过原生边界。

use thiserror::Error;

/// 桥接层核心错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Module not found: {name} ({reason})")]
    ModuleNotFound { name: String, reason: String },

    #[error("Symbol '{symbol}' not found in module '{module}' (required: {required})")]
    SymbolNotFound {
        module: String,
        symbol: &'static str,
        required: bool,
    },

    #[error("Stale entity reference for tag '{tag}'")]
    StaleEntityReference { tag: String },

    #[error("Boundary string encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Module '{0}' unloaded more times than it was loaded")]
    DoubleUnload(String),

    #[error("Module '{module}' does not export required entry point '{symbol}'")]
    MissingRequiredEntryPoint {
        module: String,
        symbol: &'static str,
    },

    #[error("Module '{module}' speaks ABI version {found:?}, host expects {expected}")]
    AbiMismatch {
        module: String,
        expected: u32,
        found: Option<u32>,
    },

    #[error("Handle for module '{0}' outlived its module")]
    StaleHandle(String),

    #[error("Invalid bridge state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// 该错误是否只需本地恢复并记录日志
    pub fn is_recoverable(&self) -> bool {
        match self {
            BridgeError::SymbolNotFound { required, .. } => !required,
            BridgeError::StaleEntityReference { .. }
            | BridgeError::DoubleUnload(_)
            | BridgeError::Encoding(_) => true,
            _ => false,
        }
    }
}

/// 边界字符串编码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("null pointer with non-zero length {0}")]
    NullPointer(usize),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
