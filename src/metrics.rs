//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存同步层的指标收集功能。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 指标收集器
///
/// 每个会话持有一个实例，不使用全局静态变量
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// 本地命中次数
    hits: AtomicU64,
    /// 本地未命中次数
    misses: AtomicU64,
    /// 实际发出的远程请求数
    remote_fetches: AtomicU64,
    /// 合并到已有远程请求上的调用数
    coalesced_waiters: AtomicU64,
    /// 推送更新的实体数
    push_updates: AtomicU64,
    /// 推送删除事件数
    push_removals: AtomicU64,
    /// 观察者回调失败次数
    observer_failures: AtomicU64,
}

/// 指标快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub remote_fetches: u64,
    pub coalesced_waiters: u64,
    pub push_updates: u64,
    pub push_removals: u64,
    pub observer_failures: u64,
    pub taken_at: DateTime<Utc>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次本地查找
    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_remote_fetch(&self) {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_updates(&self, count: usize) {
        self.push_updates.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_push_removal(&self) {
        self.push_removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_observer_failures(&self, count: usize) {
        self.observer_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 获取当前指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_fetches: self.remote_fetches.load(Ordering::Relaxed),
            coalesced_waiters: self.coalesced_waiters.load(Ordering::Relaxed),
            push_updates: self.push_updates.load(Ordering::Relaxed),
            push_removals: self.push_removals.load(Ordering::Relaxed),
            observer_failures: self.observer_failures.load(Ordering::Relaxed),
            taken_at: Utc::now(),
        }
    }
}

impl MetricsSnapshot {
    /// 将指标格式化为文本，用于监控系统采集
    ///
    /// # 参数
    ///
    /// * `session` - 会话标识，作为标签输出
    pub fn render(&self, session: &str) -> String {
        let counters = [
            ("oxsync_cache_hits_total", self.hits),
            ("oxsync_cache_misses_total", self.misses),
            ("oxsync_remote_fetches_total", self.remote_fetches),
            ("oxsync_coalesced_waiters_total", self.coalesced_waiters),
            ("oxsync_push_updates_total", self.push_updates),
            ("oxsync_push_removals_total", self.push_removals),
            ("oxsync_observer_failures_total", self.observer_failures),
        ];

        let mut output = String::new();
        for (name, value) in counters {
            output.push_str(&format!("{}{{session=\"{}\"}} {}\n", name, session, value));
        }
        output
    }
}
