//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了远程请求合并器：同一个键同一时刻最多只有一个远程请求在途。

use crate::cache::lock::mutex_lock;
use crate::error::{FetchError, FetchResult};
use crate::metrics::CacheMetrics;
use crate::model::EntityKey;
use crate::remote::EntityFetcher;
use futures::FutureExt;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, instrument, warn};

/// 获取结果回调
pub type FetchCallback<V> = Box<dyn FnOnce(FetchResult<V>) + Send + 'static>;

/// 挂起登记表：键 -> 按登记顺序排列的回调
type PendingMap<K, V> = Mutex<HashMap<K, Vec<FetchCallback<V>>>>;

#[derive(Error, Debug)]
#[error("remote fetch panicked: {0}")]
struct FetchPanicked(String);

#[derive(Error, Debug)]
#[error("no async runtime available to run the remote fetch")]
struct NoRuntime;

#[derive(Error, Debug)]
#[error("fetch callback dropped before completion")]
struct CallbackDropped;

#[derive(Error, Debug)]
#[error("remote fetch task dropped before completion")]
struct FetchAborted;

/// 远程请求合并器
///
/// 对同一个键的并发请求只发出一次远程调用，调用完成后按登记顺序把同一个结果
/// 分发给所有等待者。合并器从不写缓存：远程服务会为返回的实体单独推送变更通知，
/// 缓存只由推送通道写入，避免获取结果与并发到达的推送互相覆盖。
///
/// 挂起登记表中存在某个键，当且仅当该键恰有一个远程请求在途。
/// 登记表的移除与回调列表快照是同一个原子操作。
pub struct RequestCoalescer<K: EntityKey, V: Send + 'static> {
    name: &'static str,
    fetcher: Arc<dyn EntityFetcher<K, V>>,
    pending: Arc<PendingMap<K, V>>,
    metrics: Option<Arc<CacheMetrics>>,
    runtime: Option<Handle>,
}

impl<K, V> RequestCoalescer<K, V>
where
    K: EntityKey,
    V: Clone + Send + 'static,
{
    /// 创建合并器
    ///
    /// 在 tokio 运行时内创建时会记住当前运行时，之后可以从任意线程发起请求
    ///
    /// # 参数
    ///
    /// * `name` - 用于日志的名称
    /// * `fetcher` - 远程获取实现
    pub fn new(name: &'static str, fetcher: Arc<dyn EntityFetcher<K, V>>) -> Self {
        Self {
            name,
            fetcher,
            pending: Arc::new(Mutex::new(HashMap::new())),
            metrics: None,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 获取单个实体（回调形式）
    ///
    /// 该键已有请求在途时只登记回调；否则登记并发起一次远程调用。
    /// 无论哪种情况都立即返回，回调恰好被调用一次。
    ///
    /// # 参数
    ///
    /// * `key` - 实体键，空键在本地直接以 `InvalidKey` 拒绝
    /// * `callback` - 结果回调
    #[instrument(skip(self, callback), level = "debug", fields(coalescer = self.name))]
    pub fn fetch_one<F>(&self, key: K, callback: F)
    where
        F: FnOnce(FetchResult<V>) + Send + 'static,
    {
        if key.is_empty_key() {
            debug!("{}: empty key rejected locally", self.name);
            callback(Err(FetchError::InvalidKey(format!("{:?}", key))));
            return;
        }

        // 检查和登记在同一个临界区内完成，远程调用在释放锁之后发起
        {
            let mut pending = mutex_lock(&self.pending, "coalescer.register");
            match pending.entry(key.clone()) {
                Entry::Occupied(mut waiters) => {
                    waiters.get_mut().push(Box::new(callback));
                    debug!(
                        "{}: joined in-flight fetch, waiters={}",
                        self.name,
                        waiters.get().len()
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_coalesced();
                    }
                    return;
                }
                Entry::Vacant(slot) => {
                    slot.insert(vec![Box::new(callback)]);
                }
            }
        }

        self.start_fetch(key);
    }

    /// 获取单个实体（异步形式）
    pub async fn fetch(&self, key: K) -> FetchResult<V> {
        let (tx, rx) = oneshot::channel();
        self.fetch_one(key, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or_else(|_| Err(FetchError::transport(CallbackDropped)))
    }

    /// 批量获取（不做按键去重）
    ///
    /// 空列表立即以空结果成功；含空键时本地拒绝整个请求。
    pub fn fetch_many<F>(&self, keys: Vec<K>, callback: F)
    where
        F: FnOnce(FetchResult<Vec<V>>) + Send + 'static,
    {
        if keys.is_empty() {
            callback(Ok(Vec::new()));
            return;
        }
        if let Some(bad) = keys.iter().find(|k| k.is_empty_key()) {
            callback(Err(FetchError::InvalidKey(format!("{:?}", bad))));
            return;
        }

        let Some(runtime) = self.runtime() else {
            warn!("{}: fetch_many without runtime", self.name);
            callback(Err(FetchError::transport(NoRuntime)));
            return;
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_remote_fetch();
        }
        debug!("{}: bulk fetch, keys={}", self.name, keys.len());

        let fetcher = self.fetcher.clone();
        let name = self.name;
        let callback: FetchCallback<Vec<V>> = Box::new(callback);
        let guard = BulkGuard {
            name,
            callback: Some(callback),
        };
        runtime.spawn(async move {
            let outcome = AssertUnwindSafe(fetcher.fetch_many(&keys))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_to_error(name, panic)));
            guard.finish(outcome);
        });
    }

    /// 批量获取（异步形式）
    pub async fn fetch_all(&self, keys: Vec<K>) -> FetchResult<Vec<V>> {
        let (tx, rx) = oneshot::channel();
        self.fetch_many(keys, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or_else(|_| Err(FetchError::transport(CallbackDropped)))
    }

    /// 该键是否有远程请求在途
    pub fn is_in_flight(&self, key: &K) -> bool {
        mutex_lock(&self.pending, "coalescer.is_in_flight").contains_key(key)
    }

    /// 在途请求数
    pub fn in_flight_count(&self) -> usize {
        mutex_lock(&self.pending, "coalescer.in_flight_count").len()
    }

    /// 该键当前登记的等待者数
    pub fn waiter_count(&self, key: &K) -> usize {
        mutex_lock(&self.pending, "coalescer.waiter_count")
            .get(key)
            .map(|w| w.len())
            .unwrap_or(0)
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    fn start_fetch(&self, key: K) {
        let Some(runtime) = self.runtime() else {
            warn!("{}: no runtime, failing fetch for {:?}", self.name, key);
            complete(self.name, &self.pending, &key, Err(FetchError::transport(NoRuntime)));
            return;
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_remote_fetch();
        }

        let fetcher = self.fetcher.clone();
        // 任务在完成前被丢弃（运行时关闭或被中止）时由守卫结束登记
        let guard = CompletionGuard {
            name: self.name,
            pending: self.pending.clone(),
            key: Some(key.clone()),
        };
        let name = self.name;
        runtime.spawn(async move {
            debug!("{}: remote fetch started for {:?}", name, key);
            let outcome = AssertUnwindSafe(fetcher.fetch_one(&key))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_to_error(name, panic)));
            guard.finish(outcome);
        });
    }
}

/// 保证在途请求的登记一定被移除、回调一定被调用
struct CompletionGuard<K: EntityKey, V: Clone> {
    name: &'static str,
    pending: Arc<PendingMap<K, V>>,
    key: Option<K>,
}

impl<K: EntityKey, V: Clone> CompletionGuard<K, V> {
    fn finish(mut self, outcome: FetchResult<V>) {
        if let Some(key) = self.key.take() {
            complete(self.name, &self.pending, &key, outcome);
        }
    }
}

impl<K: EntityKey, V: Clone> Drop for CompletionGuard<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            warn!("{}: fetch task for {:?} dropped before completion", self.name, key);
            complete(
                self.name,
                &self.pending,
                &key,
                Err(FetchError::transport(FetchAborted)),
            );
        }
    }
}

/// 批量请求的回调守卫
struct BulkGuard<V> {
    name: &'static str,
    callback: Option<FetchCallback<Vec<V>>>,
}

impl<V> BulkGuard<V> {
    fn finish(mut self, outcome: FetchResult<Vec<V>>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl<V> Drop for BulkGuard<V> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("{}: bulk fetch task dropped before completion", self.name);
            callback(Err(FetchError::transport(FetchAborted)));
        }
    }
}

/// 移除登记并分发结果
///
/// 移除和快照是一步原子操作；分发时不持有任何锁，回调可以重入合并器。
fn complete<K: EntityKey, V: Clone>(
    name: &'static str,
    pending: &PendingMap<K, V>,
    key: &K,
    outcome: FetchResult<V>,
) {
    let waiters = mutex_lock(pending, "coalescer.complete")
        .remove(key)
        .unwrap_or_default();
    debug!(
        "{}: fetch for {:?} completed, ok={}, waiters={}",
        name,
        key,
        outcome.is_ok(),
        waiters.len()
    );

    for waiter in waiters {
        let outcome = outcome.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(move || waiter(outcome))).is_err() {
            error!("{}: fetch callback for {:?} panicked", name, key);
        }
    }
}

fn panic_to_error(name: &str, panic: Box<dyn std::any::Any + Send>) -> FetchError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("{}: remote fetch panicked: {}", name, message);
    FetchError::transport(FetchPanicked(message))
}
