//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了线程安全的键值实体缓存。

use crate::model::EntityKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument};

/// 带写入序号的缓存值
#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    revision: u64,
}

/// 键值实体缓存
///
/// 保存每个键最近一次被接受的值。写入只修改映射本身，
/// 变更通知由调用方（推送处理或会话）显式完成，这样启动时的批量加载不会惊动观察者。
///
/// 每次被接受的写入都会在该键的临界区内获得一个单调递增的序号，
/// 同一键的序号顺序与写入生效顺序一致（按到达顺序后写者胜）。
#[derive(Debug)]
pub struct KeyedCache<K: EntityKey, V> {
    entries: DashMap<K, Stamped<V>>,
    revision: AtomicU64,
    reject_empty_keys: bool,
}

impl<K: EntityKey, V: Clone> KeyedCache<K, V> {
    /// 创建拒绝空键写入的缓存
    pub fn new() -> Self {
        Self::with_options(true)
    }

    /// 创建缓存
    ///
    /// # 参数
    ///
    /// * `reject_empty_keys` - 是否丢弃空键写入
    pub fn with_options(reject_empty_keys: bool) -> Self {
        Self {
            entries: DashMap::new(),
            revision: AtomicU64::new(0),
            reject_empty_keys,
        }
    }

    /// 本地查找，永不阻塞，永不触发远程请求
    pub fn get(&self, key: &K) -> Option<V> {
        if self.rejects(key) {
            debug!("KeyedCache get: empty key");
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// 获取值及其写入序号
    pub fn get_with_revision(&self, key: &K) -> Option<(V, u64)> {
        self.entries
            .get(key)
            .map(|e| (e.value.clone(), e.revision))
    }

    /// 键当前值的写入序号
    pub fn revision(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|e| e.revision)
    }

    pub fn has(&self, key: &K) -> bool {
        !self.rejects(key) && self.entries.contains_key(key)
    }

    /// 插入或覆盖
    ///
    /// # 返回值
    ///
    /// 写入是否被接受（仅空键会被拒绝）
    #[instrument(skip(self, value), level = "trace")]
    pub fn put(&self, key: K, value: V) -> bool {
        if self.rejects(&key) {
            debug!("KeyedCache put: empty key rejected");
            return false;
        }

        // 序号在分片锁内分配，保证同一键的序号与覆盖顺序一致
        let slot = self.entries.entry(key);
        let revision = self.next_revision();
        slot.insert(Stamped { value, revision });
        true
    }

    /// 批量写入，每个元素按 `put` 处理
    ///
    /// # 返回值
    ///
    /// 被接受的条数
    pub fn put_all<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let accepted = values
            .into_iter()
            .map(|(k, v)| self.put(k, v))
            .filter(|ok| *ok)
            .count();
        debug!("KeyedCache put_all: accepted={}", accepted);
        accepted
    }

    /// 所有缓存值的快照（顺序不保证）
    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|e| e.value().value.clone()).collect()
    }

    /// 按条件筛选缓存值
    pub fn filter_values<F>(&self, mut predicate: F) -> Vec<V>
    where
        F: FnMut(&V) -> bool,
    {
        self.entries
            .iter()
            .filter(|e| predicate(&e.value().value))
            .map(|e| e.value().value.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空所有条目（会话注销时使用）
    pub fn clear(&self) {
        debug!("KeyedCache clear: entries={}", self.entries.len());
        self.entries.clear();
    }

    /// 读写使用同一个空键策略
    fn rejects(&self, key: &K) -> bool {
        self.reject_empty_keys && key.is_empty_key()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl<K: EntityKey, V: Clone> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
