//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 请求合并集成测试

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{setup_logging, GatedUserFetcher};
use mockall::mock;
use oxsync::metrics::CacheMetrics;
use oxsync::{EntityFetcher, FetchError, FetchResult, RequestCoalescer, UserProfile};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

mock! {
    pub UserFetcher {}

    #[async_trait]
    impl EntityFetcher<String, UserProfile> for UserFetcher {
        async fn fetch_one(&self, key: &String) -> FetchResult<UserProfile>;
        async fn fetch_many(&self, keys: &[String]) -> FetchResult<Vec<UserProfile>>;
    }
}

fn users_coalescer(
    fetcher: Arc<dyn EntityFetcher<String, UserProfile>>,
) -> RequestCoalescer<String, UserProfile> {
    RequestCoalescer::new("users", fetcher)
}

async fn wait_for_waiters(coalescer: &RequestCoalescer<String, UserProfile>, key: &str, n: usize) {
    let key = key.to_string();
    while coalescer.waiter_count(&key) < n {
        tokio::task::yield_now().await;
    }
}

// 模拟并发请求
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_share_one_remote_call() {
    setup_logging();

    let fetcher = GatedUserFetcher::new();
    let metrics = Arc::new(CacheMetrics::new());
    let coalescer = Arc::new(
        users_coalescer(fetcher.clone()).with_metrics(metrics.clone()),
    );

    let concurrency = 50;
    let barrier = Arc::new(Barrier::new(concurrency));
    let mut handles = vec![];

    for _ in 0..concurrency {
        let c = coalescer.clone();
        let b = barrier.clone();
        handles.push(tokio::spawn(async move {
            b.wait().await;
            c.fetch("hot".to_string()).await
        }));
    }

    wait_for_waiters(&coalescer, "hot", concurrency).await;
    assert!(coalescer.is_in_flight(&"hot".to_string()));
    fetcher.release();

    for handle in handles {
        let user = handle.await.unwrap().unwrap();
        assert_eq!(user.account, "hot");
        assert_eq!(user.name.as_deref(), Some("remote hot"));
    }

    assert_eq!(fetcher.calls(), 1, "only one remote call per key");
    assert_eq!(coalescer.in_flight_count(), 0);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.remote_fetches, 1);
    assert_eq!(snapshot.coalesced_waiters, (concurrency - 1) as u64);
}

#[tokio::test]
async fn test_domain_failure_reaches_every_waiter() {
    setup_logging();

    let fetcher = GatedUserFetcher::new();
    fetcher.fail_with("ghost", 404);
    let coalescer = Arc::new(users_coalescer(fetcher.clone()));

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let outcomes = outcomes.clone();
        coalescer.fetch_one("ghost".to_string(), move |outcome| {
            outcomes.lock().unwrap().push((i, outcome.map_err(|e| e.code())));
        });
    }
    assert_eq!(coalescer.waiter_count(&"ghost".to_string()), 5);

    fetcher.release();
    while outcomes.lock().unwrap().len() < 5 {
        tokio::task::yield_now().await;
    }

    let outcomes = outcomes.lock().unwrap();
    let order: Vec<i32> = outcomes.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4], "callbacks run in registration order");
    assert!(outcomes.iter().all(|(_, o)| *o == Err(Some(404))));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_distinct_keys_fetch_independently() {
    let fetcher = GatedUserFetcher::new();
    let coalescer = Arc::new(users_coalescer(fetcher.clone()));

    let a = tokio::spawn({
        let c = coalescer.clone();
        async move { c.fetch("a".to_string()).await }
    });
    let b = tokio::spawn({
        let c = coalescer.clone();
        async move { c.fetch("b".to_string()).await }
    });

    while coalescer.in_flight_count() < 2 {
        tokio::task::yield_now().await;
    }
    fetcher.release();

    assert_eq!(a.await.unwrap().unwrap().account, "a");
    assert_eq!(b.await.unwrap().unwrap().account, "b");
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_empty_key_rejected_without_remote_call() {
    let mut mock = MockUserFetcher::new();
    mock.expect_fetch_one().never();
    mock.expect_fetch_many().never();
    let coalescer = users_coalescer(Arc::new(mock));

    let err = coalescer.fetch(String::new()).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidKey(_)));

    let err = coalescer
        .fetch_all(vec!["alice".to_string(), String::new()])
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidKey(_)));

    // 空列表直接成功
    let users = coalescer.fetch_all(Vec::new()).await.unwrap();
    assert!(users.is_empty());
}

#[tokio::test]
async fn test_bulk_fetch_is_one_call_without_dedup() {
    let mut mock = MockUserFetcher::new();
    mock.expect_fetch_many()
        .times(1)
        .returning(|keys| Ok(keys.iter().map(|k| UserProfile::new(k.clone())).collect()));
    let coalescer = users_coalescer(Arc::new(mock));

    let users = coalescer
        .fetch_all(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        .await
        .unwrap();
    let accounts: Vec<&str> = users.iter().map(|u| u.account.as_str()).collect();
    assert_eq!(accounts, vec!["a", "b", "a"]);
}

#[tokio::test]
async fn test_transport_error_forwarded_verbatim() {
    let mut mock = MockUserFetcher::new();
    mock.expect_fetch_one().times(1).returning(|_| {
        Err(FetchError::transport(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    });
    let coalescer = users_coalescer(Arc::new(mock));

    let err = coalescer.fetch("alice".to_string()).await.unwrap_err();
    match err {
        FetchError::Transport(inner) => assert!(inner.to_string().contains("connection reset")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_after_completion_issues_new_call() {
    let mut mock = MockUserFetcher::new();
    mock.expect_fetch_one()
        .times(2)
        .returning(|key| Ok(UserProfile::new(key.clone())));
    let coalescer = users_coalescer(Arc::new(mock));

    coalescer.fetch("alice".to_string()).await.unwrap();
    assert!(!coalescer.is_in_flight(&"alice".to_string()));
    coalescer.fetch("alice".to_string()).await.unwrap();
}
