//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了实体缓存同步层的错误类型和远程获取结果类型。

use std::sync::Arc;
use thiserror::Error;

/// 远程获取失败类型
///
/// 一次远程获取的结果会原样分发给所有等待者，因此该类型必须可克隆
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// 远程服务明确拒绝了请求（例如不存在、无权限）
    #[error("Remote service rejected the request with code {code}")]
    Domain { code: u16 },

    /// 网络或序列化失败
    #[error("Transport failure: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),

    /// 键为空，本地直接拒绝，不发起远程调用
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl FetchError {
    /// 以任意错误构造传输层失败
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FetchError::Transport(Arc::new(err))
    }

    /// 远程服务返回的错误码（仅 Domain 失败时存在）
    pub fn code(&self) -> Option<u16> {
        match self {
            FetchError::Domain { code } => Some(*code),
            _ => None,
        }
    }
}

/// 远程获取结果类型别名
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// 缓存同步层错误类型枚举
#[derive(Error, Debug)]
pub enum CacheError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML 解析错误
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON 解析错误
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// 远程获取失败
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;
