//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存同步层的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 同步闸门默认超时（毫秒）
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    pub cache: CacheConfig,
    pub sync_gate: SyncGateConfig,
    pub logging: LoggingConfig,
}

/// 缓存配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// 写入空键时直接丢弃
    pub reject_empty_keys: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reject_empty_keys: true,
        }
    }
}

/// 初始同步闸门配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SyncGateConfig {
    /// 等待首次同步完成的超时时间（毫秒）
    pub timeout_ms: u64,
}

impl Default for SyncGateConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
        }
    }
}

impl SyncGateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 日志配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter 过滤表达式，例如 "info" 或 "oxsync=debug"
    pub filter: String,
    /// 链路追踪中使用的服务名称
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            service_name: "oxsync".to_string(),
        }
    }
}

impl Config {
    /// 从 TOML 字符串解析配置并校验
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 返回校验通过的配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.sync_gate.timeout_ms == 0 {
            return Err("sync_gate.timeout_ms cannot be zero".to_string());
        }

        if self.sync_gate.timeout_ms > 600_000 {
            return Err("sync_gate.timeout_ms cannot exceed 600000 (10 minutes)".to_string());
        }

        if self.logging.filter.trim().is_empty() {
            return Err("logging.filter cannot be empty".to_string());
        }

        if self.logging.service_name.is_empty() {
            return Err("logging.service_name cannot be empty".to_string());
        }

        Ok(())
    }
}
