//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存同步层的日志和链路追踪初始化。

use crate::config::LoggingConfig;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 初始化日志与 OpenTelemetry Tracing
///
/// 应在应用程序启动时调用一次；重复调用时保留已安装的全局 subscriber。
///
/// # 参数
///
/// * `service_name` - 服务名称
/// * `filter` - EnvFilter 表达式，`RUST_LOG` 存在时优先使用环境变量
///
/// # 返回值
///
/// 本次调用是否成功安装了全局 subscriber
pub fn init_tracing(service_name: &str, filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // 未配置 exporter 时 provider 为 no-op，只保留 span 上下文
    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

/// 按配置初始化
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init_tracing(&config.service_name, &config.filter)
}
