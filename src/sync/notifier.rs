//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了实体变更通知：有序的观察者登记表和批量分发。

use crate::cache::lock::{rw_read, rw_write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error};

/// 实体变更观察者
///
/// 每次通知以整批形式送达，UI 可以按批合并重绘
pub trait ChangeObserver<V>: Send + Sync {
    /// 一批实体被新增或更新
    fn on_changed(&self, values: &[V]);

    /// 单个实体被移除（默认忽略）
    fn on_removed(&self, _value: &V) {}
}

impl<V, F> ChangeObserver<V> for F
where
    F: Fn(&[V]) + Send + Sync,
{
    fn on_changed(&self, values: &[V]) {
        self(values)
    }
}

struct Registration<V> {
    id: u64,
    observer: Arc<dyn ChangeObserver<V>>,
}

struct Registry<V> {
    name: &'static str,
    observers: RwLock<Vec<Registration<V>>>,
    next_id: AtomicU64,
}

trait Unregister: Send + Sync {
    fn unregister_id(&self, id: u64) -> bool;
}

impl<V: 'static> Unregister for Registry<V> {
    fn unregister_id(&self, id: u64) -> bool {
        let mut observers = rw_write(&self.observers, "notifier.unregister_id");
        let before = observers.len();
        observers.retain(|r| r.id != id);
        before != observers.len()
    }
}

/// 订阅句柄
///
/// 句柄被丢弃或调用 `unsubscribe` 时取消订阅；`detach` 让订阅保持到通知器销毁。
/// 重复登记同一个观察者返回的句柄是惰性的，丢弃它不会影响原有订阅。
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    id: Option<u64>,
    registry: Weak<dyn Unregister>,
}

impl Subscription {
    /// 句柄是否对应一次实际的登记
    pub fn is_active(&self) -> bool {
        self.id.is_some() && self.registry.strong_count() > 0
    }

    /// 显式取消订阅
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    /// 放弃句柄但保留订阅
    pub fn detach(mut self) {
        self.id = None;
    }

    fn release(&mut self) -> bool {
        match (self.id.take(), self.registry.upgrade()) {
            (Some(id), Some(registry)) => registry.unregister_id(id),
            _ => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// 变更通知器
///
/// 观察者按登记顺序接收通知。分发前在读锁内复制观察者列表，
/// 回调执行时不持有任何锁，回调中可以重入登记或注销。
/// 单个观察者 panic 会被记录并跳过，不影响后续观察者。
pub struct ChangeNotifier<V> {
    registry: Arc<Registry<V>>,
}

impl<V: 'static> ChangeNotifier<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            registry: Arc::new(Registry {
                name,
                observers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 登记观察者
    ///
    /// 同一个观察者实例（按 Arc 指针判断）重复登记是空操作
    ///
    /// # 返回值
    ///
    /// 订阅句柄
    pub fn register(&self, observer: Arc<dyn ChangeObserver<V>>) -> Subscription {
        let weak: Weak<Registry<V>> = Arc::downgrade(&self.registry);
        let registry: Weak<dyn Unregister> = weak;

        let mut observers = rw_write(&self.registry.observers, "notifier.register");
        if observers.iter().any(|r| same_observer(&r.observer, &observer)) {
            debug!("{}: observer already registered", self.registry.name);
            return Subscription { id: None, registry };
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        observers.push(Registration { id, observer });
        debug!(
            "{}: observer registered, id={}, total={}",
            self.registry.name,
            id,
            observers.len()
        );
        Subscription {
            id: Some(id),
            registry,
        }
    }

    /// 按实例注销观察者，未登记时为空操作
    pub fn unregister(&self, observer: &Arc<dyn ChangeObserver<V>>) -> bool {
        let mut observers = rw_write(&self.registry.observers, "notifier.unregister");
        let before = observers.len();
        observers.retain(|r| !same_observer(&r.observer, observer));
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        rw_read(&self.registry.observers, "notifier.observer_count").len()
    }

    /// 通知一批变更
    ///
    /// # 返回值
    ///
    /// 回调失败的观察者数量
    pub fn notify_changed(&self, values: &[V]) -> usize {
        if values.is_empty() {
            return 0;
        }
        self.dispatch("on_changed", |observer| observer.on_changed(values))
    }

    /// 通知单个实体被移除
    pub fn notify_removed(&self, value: &V) -> usize {
        self.dispatch("on_removed", |observer| observer.on_removed(value))
    }

    fn dispatch<F>(&self, op: &'static str, deliver: F) -> usize
    where
        F: Fn(&dyn ChangeObserver<V>),
    {
        let snapshot: Vec<Arc<dyn ChangeObserver<V>>> =
            rw_read(&self.registry.observers, "notifier.dispatch")
                .iter()
                .map(|r| r.observer.clone())
                .collect();

        let mut failures = 0;
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| deliver(observer.as_ref()))).is_err() {
                failures += 1;
                error!("{}: observer panicked during {}", self.registry.name, op);
            }
        }
        failures
    }
}

fn same_observer<V>(a: &Arc<dyn ChangeObserver<V>>, b: &Arc<dyn ChangeObserver<V>>) -> bool {
    // 只比较数据指针，忽略 vtable
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
