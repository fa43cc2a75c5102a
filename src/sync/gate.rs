//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了初始同步闸门：跟踪登录后首次批量同步是否完成，
//! 并在完成或超时时一次性通知所有等待者。

use crate::cache::lock::mutex_lock;
use crate::config::SyncGateConfig;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// 未开始（自动登录等情况下可能根本不会同步）
    NotStarted,
    /// 正在同步
    InProgress,
    /// 同步完成
    Completed,
}

/// 传输层下发的同步状态事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    BeginSync,
    SyncCompleted,
}

/// 异步等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 调用时未在同步中，无需等待
    Ready,
    /// 收到同步完成事件
    Completed,
    /// 超时，按降级完成处理
    TimedOut,
    /// 闸门被重置（会话注销），等待被取消
    Cancelled,
}

type GateWaiter = Box<dyn FnOnce(bool) + Send + 'static>;

struct ArmedTimer {
    epoch: u64,
    cancel: CancellationToken,
}

struct GateInner {
    state: SyncState,
    waiters: Vec<GateWaiter>,
    timer: Option<ArmedTimer>,
    epoch: u64,
}

impl GateInner {
    /// 取出全部等待者并撤销定时器，必须在锁内调用
    fn take_waiters(&mut self) -> Vec<GateWaiter> {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
        }
        std::mem::take(&mut self.waiters)
    }
}

/// 初始同步闸门
///
/// 状态转换：`NotStarted -> InProgress -> Completed`，只有 `reset` 回到 `NotStarted`。
/// 登记等待者和取出等待者在同一把锁内互斥进行，等待者只会在取出后被调用一次。
pub struct SyncGate {
    inner: Arc<Mutex<GateInner>>,
    timeout: Duration,
    runtime: Option<Handle>,
}

impl SyncGate {
    /// 创建闸门
    ///
    /// # 参数
    ///
    /// * `timeout` - 同步中等待者的最长等待时间
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                state: SyncState::NotStarted,
                waiters: Vec::new(),
                timer: None,
                epoch: 0,
            })),
            timeout,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn from_config(config: &SyncGateConfig) -> Self {
        Self::new(config.timeout())
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn state(&self) -> SyncState {
        mutex_lock(&self.inner, "gate.state").state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn waiter_count(&self) -> usize {
        mutex_lock(&self.inner, "gate.waiter_count").waiters.len()
    }

    pub fn is_timer_armed(&self) -> bool {
        mutex_lock(&self.inner, "gate.is_timer_armed").timer.is_some()
    }

    /// 处理传输层的同步状态事件
    pub fn on_status_event(&self, status: SyncStatus) {
        let released = {
            let mut inner = mutex_lock(&self.inner, "gate.on_status_event");
            match status {
                SyncStatus::BeginSync => {
                    if inner.state != SyncState::InProgress {
                        info!("login sync data begin");
                        inner.state = SyncState::InProgress;
                    }
                    None
                }
                SyncStatus::SyncCompleted => {
                    if inner.state == SyncState::InProgress {
                        inner.state = SyncState::Completed;
                        Some(inner.take_waiters())
                    } else {
                        debug!("sync completed event ignored, state={:?}", inner.state);
                        None
                    }
                }
            }
        };

        if let Some(waiters) = released {
            info!("login sync data completed, waiters={}", waiters.len());
            release(waiters, false);
        }
    }

    /// 等待首次同步完成
    ///
    /// 未开始或已完成时直接返回 `true`，不登记观察者；
    /// 同步中则登记观察者，必要时启动共享的超时定时器，并返回 `false`。
    /// 观察者之后恰好被调用一次，参数表示是否因超时而放行。
    pub fn await_completion<F>(&self, observer: F) -> bool
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let mut inner = mutex_lock(&self.inner, "gate.await_completion");
        if inner.state != SyncState::InProgress {
            return true;
        }

        inner.waiters.push(Box::new(observer));
        if inner.timer.is_none() {
            self.arm_timer(&mut inner);
        }
        false
    }

    /// 异步等待首次同步完成或超时
    pub async fn wait(&self) -> SyncOutcome {
        let (tx, rx) = oneshot::channel();
        let ready = self.await_completion(move |timed_out| {
            let _ = tx.send(timed_out);
        });
        if ready {
            return SyncOutcome::Ready;
        }

        match rx.await {
            Ok(false) => SyncOutcome::Completed,
            Ok(true) => SyncOutcome::TimedOut,
            Err(_) => SyncOutcome::Cancelled,
        }
    }

    /// 重置到 `NotStarted`
    ///
    /// 会话注销时调用：清空等待者但不通知它们
    pub fn reset(&self) {
        let dropped = {
            let mut inner = mutex_lock(&self.inner, "gate.reset");
            inner.state = SyncState::NotStarted;
            inner.take_waiters()
        };
        info!("sync gate reset, discarded waiters={}", dropped.len());
    }

    fn arm_timer(&self, inner: &mut GateInner) {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("no async runtime, sync gate timeout disabled");
            return;
        };

        inner.epoch += 1;
        let epoch = inner.epoch;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let gate: Weak<Mutex<GateInner>> = Arc::downgrade(&self.inner);
        let timeout = self.timeout;

        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(gate) = gate.upgrade() {
                        fire_timeout(&gate, epoch);
                    }
                }
            }
        });

        debug!("sync gate timer armed, epoch={}, timeout={:?}", epoch, timeout);
        inner.timer = Some(ArmedTimer { epoch, cancel });
    }
}

impl Drop for SyncGate {
    fn drop(&mut self) {
        if let Some(timer) = mutex_lock(&self.inner, "gate.drop").timer.take() {
            timer.cancel.cancel();
        }
    }
}

/// 超时触发：仍在同步中则视为完成放行等待者，但不改变外部驱动的状态
fn fire_timeout(gate: &Mutex<GateInner>, epoch: u64) {
    let released = {
        let mut inner = mutex_lock(gate, "gate.fire_timeout");
        match &inner.timer {
            Some(timer) if timer.epoch == epoch => {}
            // 已被完成事件或重置撤销，或已被新的定时器取代
            _ => return,
        }
        inner.timer = None;
        if inner.state == SyncState::InProgress {
            std::mem::take(&mut inner.waiters)
        } else {
            Vec::new()
        }
    };

    if !released.is_empty() {
        warn!("login sync data timed out, releasing waiters={}", released.len());
        release(released, true);
    }
}

fn release(waiters: Vec<GateWaiter>, timed_out: bool) {
    for waiter in waiters {
        if catch_unwind(AssertUnwindSafe(move || waiter(timed_out))).is_err() {
            error!("sync gate waiter panicked, timed_out={}", timed_out);
        }
    }
}
