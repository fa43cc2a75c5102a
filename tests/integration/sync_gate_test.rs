//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 初始同步闸门集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{new_session, sample_dataset, setup_logging};
use oxsync::remote::InMemoryRemote;
use oxsync::{Config, SessionEvent, SyncGate, SyncOutcome, SyncState, SyncStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl FnOnce(bool) + Send + 'static) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    (fired, move |timed_out| sink.lock().unwrap().push(timed_out))
}

#[tokio::test(start_paused = true)]
async fn test_not_started_returns_immediately() {
    setup_logging();
    let gate = SyncGate::new(Duration::from_secs(10));
    let (fired, observer) = recorder();

    assert!(gate.await_completion(observer));
    assert_eq!(gate.waiter_count(), 0);
    assert!(!gate.is_timer_armed());
    assert!(fired.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completion_releases_waiters_once() {
    let gate = SyncGate::new(Duration::from_secs(10));
    gate.on_status_event(SyncStatus::BeginSync);

    let (fired, observer) = recorder();
    assert!(!gate.await_completion(observer));
    assert!(gate.is_timer_armed());

    gate.on_status_event(SyncStatus::SyncCompleted);
    assert_eq!(*fired.lock().unwrap(), vec![false]);
    assert_eq!(gate.state(), SyncState::Completed);
    assert!(!gate.is_timer_armed());

    // 超时时间过去之后不会再次调用
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(*fired.lock().unwrap(), vec![false]);

    // 已完成时直接返回
    let (late, observer) = recorder();
    assert!(gate.await_completion(observer));
    assert!(late.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_without_changing_state() {
    let gate = SyncGate::new(Duration::from_secs(10));
    gate.on_status_event(SyncStatus::BeginSync);

    let (fired, observer) = recorder();
    assert!(!gate.await_completion(observer));

    tokio::time::sleep(Duration::from_millis(9_999)).await;
    assert!(fired.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(*fired.lock().unwrap(), vec![true]);
    assert_eq!(gate.state(), SyncState::InProgress);

    // 迟到的完成事件仍然推进状态，但不会再调用已放行的观察者
    gate.on_status_event(SyncStatus::SyncCompleted);
    assert_eq!(gate.state(), SyncState::Completed);
    assert_eq!(*fired.lock().unwrap(), vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_discards_waiters_silently() {
    let gate = SyncGate::new(Duration::from_secs(10));
    gate.on_status_event(SyncStatus::BeginSync);

    let (fired, observer) = recorder();
    assert!(!gate.await_completion(observer));
    gate.reset();

    assert_eq!(gate.state(), SyncState::NotStarted);
    assert_eq!(gate.waiter_count(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(fired.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_wait_honours_configured_timeout() {
    let config = Config::from_toml_str("[sync_gate]\ntimeout_ms = 2000\n").unwrap();
    let session = new_session(Arc::new(InMemoryRemote::new(sample_dataset())), &config);
    session.on_sync_status(SyncStatus::BeginSync);

    let started = tokio::time::Instant::now();
    assert_eq!(session.wait_sync_completed().await, SyncOutcome::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(2100));
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_drives_gate() {
    let session = new_session(
        Arc::new(InMemoryRemote::new(sample_dataset())),
        &Config::default(),
    );
    assert_eq!(session.wait_sync_completed().await, SyncOutcome::Ready);

    let (tx, rx) = futures::channel::mpsc::unbounded::<SessionEvent>();
    let events = session.run_events(rx);

    tx.unbounded_send(SyncStatus::BeginSync.into()).unwrap();
    while session.sync_state() != SyncState::InProgress {
        tokio::task::yield_now().await;
    }

    let (fired, observer) = recorder();
    assert!(!session.await_sync_completed(observer));

    tx.unbounded_send(SyncStatus::SyncCompleted.into()).unwrap();
    while fired.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(*fired.lock().unwrap(), vec![false]);

    drop(tx);
    events.await.unwrap();
    assert_eq!(session.sync_state(), SyncState::Completed);
}
