//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了两级键值缓存，用于按父实体划分的成员数据（例如每个群的成员表）。

use crate::model::EntityKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// 父键下的子项及其最近一次写入序号
#[derive(Debug)]
struct Children<K2, V> {
    values: HashMap<K2, V>,
    revision: u64,
}

impl<K2, V> Default for Children<K2, V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            revision: 0,
        }
    }
}

/// 两级键值缓存
///
/// 父键不存在时由写操作在同一临界区内创建，读操作从不创建或删除父条目。
/// 只有 `clear_parent` / `clear_all` 会移除父条目。
///
/// - `replace_children`：权威全量列表，整体替换，未出现的子项被丢弃
/// - `merge_child` / `merge_children`：增量更新，只插入或覆盖指定子项
///
/// 每次写入都在父键的临界区内把父条目的序号推进到全局递增的新值。
/// 带 `since` 的写入用于远程获取的结果：获取开始时记下 [`revision`](Self::revision)，
/// 若此后该父键被写过或缓存被清空，结果就已过时，写入被丢弃。
#[derive(Debug)]
pub struct NestedKeyedCache<K1: EntityKey, K2: EntityKey, V> {
    parents: DashMap<K1, Children<K2, V>>,
    revision: AtomicU64,
    cleared_at: AtomicU64,
}

impl<K1: EntityKey, K2: EntityKey, V: Clone> NestedKeyedCache<K1, K2, V> {
    pub fn new() -> Self {
        Self {
            parents: DashMap::new(),
            revision: AtomicU64::new(0),
            cleared_at: AtomicU64::new(0),
        }
    }

    /// 当前最大写入序号，作为远程获取开始时的快照
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// 父键最近一次写入的序号
    pub fn parent_revision(&self, parent: &K1) -> Option<u64> {
        self.parents.get(parent).map(|c| c.revision)
    }

    /// 原子替换父键下的全部子项
    ///
    /// # 参数
    ///
    /// * `parent` - 父键
    /// * `children` - 新的完整子项集合，可以为空
    pub fn replace_children<I>(&self, parent: K1, children: I)
    where
        I: IntoIterator<Item = (K2, V)>,
    {
        let values: HashMap<K2, V> = children.into_iter().collect();
        debug!(
            "NestedKeyedCache replace_children: parent={:?}, children={}",
            parent,
            values.len()
        );
        let slot = self.parents.entry(parent);
        let revision = self.next_revision();
        slot.insert(Children { values, revision });
    }

    /// 仅当父键在 `since` 之后没有被写过、缓存也没有被清空时替换
    ///
    /// # 参数
    ///
    /// * `parent` - 父键
    /// * `children` - 新的完整子项集合
    /// * `since` - 获取开始时的 [`revision`](Self::revision)
    ///
    /// # 返回值
    ///
    /// 是否写入
    pub fn replace_children_since<I>(&self, parent: K1, children: I, since: u64) -> bool
    where
        I: IntoIterator<Item = (K2, V)>,
    {
        let slot = self.parents.entry(parent);
        if self.is_stale(&slot, since) {
            debug!("NestedKeyedCache replace_children_since: stale since={}", since);
            return false;
        }
        let values: HashMap<K2, V> = children.into_iter().collect();
        let revision = self.next_revision();
        slot.insert(Children { values, revision });
        true
    }

    /// 插入或覆盖单个子项，不影响其他子项
    pub fn merge_child(&self, parent: K1, child: K2, value: V) {
        let mut slot = self.parents.entry(parent).or_default();
        slot.revision = self.next_revision();
        slot.values.insert(child, value);
    }

    /// 仅当父键在 `since` 之后没有被写过、缓存也没有被清空时插入或覆盖单个子项
    pub fn merge_child_since(&self, parent: K1, child: K2, value: V, since: u64) -> bool {
        let slot = self.parents.entry(parent);
        if self.is_stale(&slot, since) {
            debug!("NestedKeyedCache merge_child_since: stale since={}", since);
            return false;
        }
        let mut slot = slot.or_default();
        slot.revision = self.next_revision();
        slot.values.insert(child, value);
        true
    }

    /// 批量插入或覆盖子项
    pub fn merge_children<I>(&self, parent: K1, values: I)
    where
        I: IntoIterator<Item = (K2, V)>,
    {
        let mut slot = self.parents.entry(parent).or_default();
        slot.revision = self.next_revision();
        slot.values.extend(values);
    }

    /// 父键下所有子项（顺序不保证）；父键不存在时返回空列表
    pub fn get_children(&self, parent: &K1) -> Vec<V> {
        self.parents
            .get(parent)
            .map(|children| children.values.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 本地查找单个子项
    ///
    /// 未命中时是否回源（同步或异步）由调用方决定
    pub fn get_child(&self, parent: &K1, child: &K2) -> Option<V> {
        self.parents
            .get(parent)
            .and_then(|children| children.values.get(child).cloned())
    }

    pub fn has_parent(&self, parent: &K1) -> bool {
        self.parents.contains_key(parent)
    }

    pub fn child_count(&self, parent: &K1) -> usize {
        self.parents.get(parent).map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    /// 移除父键及其全部子项
    pub fn clear_parent(&self, parent: &K1) -> bool {
        self.parents.remove(parent).is_some()
    }

    /// 清空全部父键
    ///
    /// 先记录清空序号再清除条目，清空前开始的带 `since` 写入都会被丢弃
    pub fn clear_all(&self) {
        let revision = self.next_revision();
        self.cleared_at.store(revision, Ordering::SeqCst);
        debug!("NestedKeyedCache clear_all: parents={}", self.parents.len());
        self.parents.clear();
    }

    // 调用时持有父键的分片锁
    fn is_stale(&self, slot: &Entry<'_, K1, Children<K2, V>>, since: u64) -> bool {
        if self.cleared_at.load(Ordering::SeqCst) > since {
            return true;
        }
        match slot {
            Entry::Occupied(children) => children.get().revision > since,
            Entry::Vacant(_) => false,
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl<K1: EntityKey, K2: EntityKey, V: Clone> Default for NestedKeyedCache<K1, K2, V> {
    fn default() -> Self {
        Self::new()
    }
}
