//! 统一配置系统
//!
//! 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use crate::core::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 桥接主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// 模块查找配置
    pub modules: ModuleSearchConfig,

    /// 行为实例，每项绑定一个原生模块到一个实体
    pub behaviors: Vec<BehaviorConfig>,

    /// 启动时生成的场景实体
    pub scene: Vec<SceneEntityConfig>,

    /// 模拟循环配置
    pub simulation: SimulationConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 按扩展名选择格式加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        // 额外的模块目录排在前面
        if let Some(paths) = env::var_os("BRIDGE_PLUGIN_PATH") {
            let mut search_paths: Vec<PathBuf> = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            search_paths.append(&mut self.modules.search_paths);
            self.modules.search_paths = search_paths;
        }

        if let Ok(val) = env::var("BRIDGE_LOG_LEVEL") {
            if let Ok(level) = val.parse() {
                self.logging.level = level;
            }
        }

        if let Ok(val) = env::var("BRIDGE_TICKS") {
            if let Ok(ticks) = val.parse() {
                self.simulation.ticks = ticks;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        for behavior in &self.behaviors {
            behavior.validate()?;
        }

        let mut tags = HashSet::new();
        for entity in &self.scene {
            if entity.tag.is_empty() {
                return Err(ConfigError::ValidationError(
                    "scene entity tag must not be empty".to_string(),
                ));
            }
            if !tags.insert(entity.tag.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate scene entity tag '{}'",
                    entity.tag
                )));
            }
        }

        self.simulation.validate()
    }

    /// 默认查找位置
    ///
    /// 按以下顺序：
    /// 1. ./bridge.toml
    /// 2. ./bridge.json
    /// 3. <用户配置目录>/native_bridge/bridge.toml
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from("bridge.toml"), PathBuf::from("bridge.json")];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("native_bridge").join("bridge.toml"));
        }
        locations
    }

    /// 自动查找并加载配置文件
    ///
    /// 第一个存在的文件会被解析，解析失败时返回错误而不是静默回退。
    /// 都不存在时使用默认配置，返回的路径为`None`。
    pub fn load_or_default() -> ConfigResult<(Self, Option<PathBuf>)> {
        for path in Self::default_locations() {
            if path.is_file() {
                let config = Self::from_file(&path)?;
                return Ok((config, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }
}

/// 模块查找配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSearchConfig {
    /// 模块目录，按顺序查找
    pub search_paths: Vec<PathBuf>,

    /// 拒绝未导出版本符号的模块
    pub strict_abi: bool,
}

impl_default!(ModuleSearchConfig {
    search_paths: vec![PathBuf::from("plugins"), PathBuf::from("plugins/x86_64")],
    strict_abi: false,
});

/// 单个行为实例配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// 模块名（可省略平台扩展名）
    pub module: String,

    /// 实例所附着实体的标签
    pub entity_tag: String,

    /// 是否向原生代码提供日志槽
    pub expose_logging_sink: bool,

    /// 回写字段
    pub authority: FieldAuthority,
}

impl_default!(BehaviorConfig {
    module: String::new(),
    entity_tag: String::new(),
    expose_logging_sink: true,
    authority: FieldAuthority::default(),
});

impl BehaviorConfig {
    pub fn new(module: impl Into<String>, entity_tag: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            entity_tag: entity_tag.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.module.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "behavior module name must not be empty".to_string(),
            ));
        }
        if self.entity_tag.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "behavior for module '{}' has an empty entity tag",
                self.module
            )));
        }
        Ok(())
    }
}

/// 原生代码返回的负载中，哪些字段由宿主回写
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAuthority {
    /// 位置和旋转
    pub transform: bool,
    /// 时间缩放
    pub time_scale: bool,
    /// 固定步长
    pub fixed_delta_time: bool,
    /// 实例自身的实体标签
    pub entity_tag: bool,
}

impl_default!(FieldAuthority {
    transform: true,
    time_scale: true,
    fixed_delta_time: true,
    entity_tag: true,
});

impl FieldAuthority {
    /// 不回写任何字段
    pub const NONE: FieldAuthority = FieldAuthority {
        transform: false,
        time_scale: false,
        fixed_delta_time: false,
        entity_tag: false,
    };
}

/// 场景实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntityConfig {
    pub tag: String,
    #[serde(default)]
    pub position: [f32; 3],
}

/// 模拟循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// 运行的帧数
    pub ticks: u64,
    /// 每帧的原始时间步长（秒）
    pub delta_time: f32,
}

impl_default!(SimulationConfig {
    ticks: 600,
    delta_time: 1.0 / 60.0,
});

impl SimulationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.delta_time.is_finite() && self.delta_time > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "delta_time must be positive, got {}",
                self.delta_time
            )));
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出日志target
    pub show_targets: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    show_targets: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::ParseError(format!("unknown log level '{}'", other))),
        }
    }
}
