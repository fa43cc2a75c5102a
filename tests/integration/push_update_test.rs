//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 推送更新与变更通知集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{new_session, sample_dataset, setup_logging};
use oxsync::remote::memory::Dataset;
use oxsync::remote::InMemoryRemote;
use oxsync::{ChangeObserver, Config, PushEvent, Team, TeamMember, TeamType, UserProfile};
use rand::seq::SliceRandom;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct BatchRecorder {
    batches: Mutex<Vec<Vec<String>>>,
    removed: Mutex<Vec<String>>,
}

impl ChangeObserver<UserProfile> for BatchRecorder {
    fn on_changed(&self, values: &[UserProfile]) {
        self.batches
            .lock()
            .unwrap()
            .push(values.iter().map(|u| u.account.clone()).collect());
    }
}

impl ChangeObserver<TeamMember> for BatchRecorder {
    fn on_changed(&self, values: &[TeamMember]) {
        self.batches
            .lock()
            .unwrap()
            .push(values.iter().map(|m| m.account.clone()).collect());
    }

    fn on_removed(&self, value: &TeamMember) {
        self.removed.lock().unwrap().push(value.account.clone());
    }
}

#[test]
fn test_never_seen_key_is_absent() {
    setup_logging();
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());

    assert!(session.user("nobody").is_none());
    assert!(!session.has_user("nobody"));
    assert!(session.team("nothing").is_none());
    assert!(session.team_members("nothing").is_empty());
    assert_eq!(session.metrics().misses, 2);
}

#[tokio::test]
async fn test_fetch_then_push_round_trip() {
    setup_logging();
    let session = new_session(
        Arc::new(InMemoryRemote::new(sample_dataset())),
        &Config::default(),
    );

    let user = session.fetch_user("alice").await.unwrap();
    assert!(
        session.user("alice").is_none(),
        "a successful fetch must not write through"
    );

    session.apply_push(PushEvent::UsersChanged {
        users: vec![user.clone()],
    });
    assert_eq!(session.user("alice"), Some(user));
}

#[test]
fn test_observer_receives_one_call_per_batch() {
    setup_logging();
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());
    let recorder = Arc::new(BatchRecorder::default());
    let observer: Arc<dyn ChangeObserver<UserProfile>> = recorder.clone();
    let _sub = session.register_user_observer(observer);

    session.apply_push(PushEvent::UsersChanged {
        users: vec![
            UserProfile::new("a"),
            UserProfile::new("b"),
            UserProfile::new("c"),
        ],
    });
    session.apply_push(PushEvent::UsersChanged { users: vec![] });

    let batches = recorder.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec!["a", "b", "c"]);
}

#[test]
fn test_last_push_wins_in_arrival_order() {
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());

    let mut names: Vec<String> = (0..20).map(|i| format!("name-{}", i)).collect();
    names.shuffle(&mut rand::thread_rng());

    for name in &names {
        session.apply_push(PushEvent::UsersChanged {
            users: vec![UserProfile::new("alice").with_name(name.clone())],
        });
    }

    let last = names.last().cloned();
    assert_eq!(session.user("alice").unwrap().name, last);
}

#[test]
fn test_duplicate_registration_does_not_double_dispatch() {
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());
    let recorder = Arc::new(BatchRecorder::default());
    let observer: Arc<dyn ChangeObserver<UserProfile>> = recorder.clone();

    let first = session.register_user_observer(observer.clone());
    let _second = session.register_user_observer(observer.clone());

    session.apply_push(PushEvent::UsersChanged {
        users: vec![UserProfile::new("a")],
    });
    assert_eq!(recorder.batches.lock().unwrap().len(), 1);

    assert!(session.unregister_user_observer(&observer));
    assert!(!session.unregister_user_observer(&observer));
    drop(first);

    session.apply_push(PushEvent::UsersChanged {
        users: vec![UserProfile::new("b")],
    });
    assert_eq!(recorder.batches.lock().unwrap().len(), 1);
}

#[test]
fn test_dropping_subscription_stops_delivery() {
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());
    let recorder = Arc::new(BatchRecorder::default());
    let observer: Arc<dyn ChangeObserver<UserProfile>> = recorder.clone();

    let sub = session.register_user_observer(observer);
    session.apply_push(PushEvent::UsersChanged {
        users: vec![UserProfile::new("a")],
    });
    drop(sub);
    session.apply_push(PushEvent::UsersChanged {
        users: vec![UserProfile::new("b")],
    });

    assert_eq!(*recorder.batches.lock().unwrap(), vec![vec!["a".to_string()]]);
}

#[test]
fn test_member_merge_keeps_unrelated_members() {
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());
    let recorder = Arc::new(BatchRecorder::default());
    let observer: Arc<dyn ChangeObserver<TeamMember>> = recorder.clone();
    let _sub = session.register_member_observer(observer);

    session.apply_push(PushEvent::MembersChanged {
        members: vec![TeamMember::new("t1", "a").with_nick("v1")],
    });
    session.apply_push(PushEvent::MembersChanged {
        members: vec![TeamMember::new("t1", "b").with_nick("v2")],
    });

    let mut accounts: Vec<String> = session
        .team_members("t1")
        .into_iter()
        .map(|m| m.account)
        .collect();
    accounts.sort();
    assert_eq!(accounts, vec!["a", "b"]);
    assert_eq!(
        session.team_member("t1", "a").unwrap().team_nick.as_deref(),
        Some("v1")
    );

    session.apply_push(PushEvent::MemberRemoved {
        member: TeamMember::new("t1", "a"),
    });
    assert_eq!(*recorder.removed.lock().unwrap(), vec!["a".to_string()]);
    assert_eq!(session.team_members("t1").len(), 1);
}

#[tokio::test]
async fn test_authoritative_member_list_replaces_previous() {
    let remote = Arc::new(InMemoryRemote::new(Dataset {
        teams: vec![Team::new("t1", TeamType::Normal)],
        members: vec![TeamMember::new("t1", "a"), TeamMember::new("t1", "b")],
        ..Default::default()
    }));
    let session = new_session(remote.clone(), &Config::default());

    session.fetch_team_members("t1").await.unwrap();
    assert_eq!(session.team_members("t1").len(), 2);

    // 服务端成员变为 {b, c}
    remote.update(|data| {
        data.members = vec![TeamMember::new("t1", "b"), TeamMember::new("t1", "c")];
    });
    session.fetch_team_members("t1").await.unwrap();

    let mut accounts: Vec<String> = session
        .team_members("t1")
        .into_iter()
        .map(|m| m.account)
        .collect();
    accounts.sort();
    assert_eq!(accounts, vec!["b", "c"]);
    assert!(session.team_member("t1", "a").is_none());
}

#[tokio::test]
async fn test_unknown_team_member_fetch_is_domain_failure() {
    let session = new_session(
        Arc::new(InMemoryRemote::new(sample_dataset())),
        &Config::default(),
    );

    let err = session.fetch_team_members("missing").await.unwrap_err();
    assert_eq!(err.code(), Some(oxsync::remote::memory::NOT_FOUND));
    assert!(session.team_members("missing").is_empty());
}

#[test]
fn test_empty_push_keys_are_rejected() {
    let session = new_session(Arc::new(InMemoryRemote::default()), &Config::default());
    session.apply_push(PushEvent::UsersChanged {
        users: vec![UserProfile::new(""), UserProfile::new("ok")],
    });
    session.apply_push(PushEvent::MembersChanged {
        members: vec![TeamMember::new("", "x")],
    });

    assert_eq!(session.all_users().len(), 1);
    assert_eq!(session.metrics().push_updates, 1);
}

fn team_with_alice(nick: &str) -> Dataset {
    Dataset {
        teams: vec![Team::new("t1", TeamType::Normal)],
        members: vec![TeamMember::new("t1", "alice").with_nick(nick)],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_push_during_member_list_fan_out_is_kept() {
    setup_logging();
    let remote = Arc::new(InMemoryRemote::new(team_with_alice("old")));
    let session = new_session(remote.clone(), &Config::default());

    // 第一个等待者在回调里收到一条更新的推送
    let pusher = session.clone();
    session.fetch_team_members_with("t1", move |outcome| {
        if outcome.is_ok() {
            pusher.apply_push(PushEvent::MembersChanged {
                members: vec![TeamMember::new("t1", "alice").with_nick("new")],
            });
        }
    });
    let (tx, rx) = tokio::sync::oneshot::channel();
    session.fetch_team_members_with("t1", move |outcome| {
        let _ = tx.send(outcome);
    });

    let list = rx.await.unwrap().unwrap();
    assert_eq!(list[0].team_nick.as_deref(), Some("old"));
    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(
        session.team_member("t1", "alice").unwrap().team_nick.as_deref(),
        Some("new")
    );
}

#[tokio::test]
async fn test_push_while_member_list_in_flight_wins() {
    setup_logging();
    let remote = Arc::new(
        InMemoryRemote::new(team_with_alice("old")).with_latency(Duration::from_millis(50)),
    );
    let session = new_session(remote.clone(), &Config::default());

    let fetch = {
        let session = session.clone();
        tokio::spawn(async move { session.fetch_team_members("t1").await })
    };
    while remote.fetch_count() == 0 {
        tokio::task::yield_now().await;
    }

    session.apply_push(PushEvent::MembersChanged {
        members: vec![TeamMember::new("t1", "alice").with_nick("new")],
    });

    // 调用者拿到远程列表，缓存保留较新的推送
    let list = fetch.await.unwrap().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].team_nick.as_deref(), Some("old"));
    assert_eq!(
        session.team_member("t1", "alice").unwrap().team_nick.as_deref(),
        Some("new")
    );
}

#[tokio::test]
async fn test_single_member_fetch_upserts_into_team() {
    let remote = Arc::new(InMemoryRemote::new(team_with_alice("Al")));
    let session = new_session(remote.clone(), &Config::default());
    session.apply_push(PushEvent::MembersChanged {
        members: vec![TeamMember::new("t1", "bob")],
    });

    let (first, second) = tokio::join!(
        session.fetch_team_member("t1", "alice"),
        session.fetch_team_member("t1", "alice")
    );
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(remote.fetch_count(), 1);

    let mut accounts: Vec<String> = session
        .team_members("t1")
        .into_iter()
        .map(|m| m.account)
        .collect();
    accounts.sort();
    assert_eq!(accounts, vec!["alice", "bob"]);
    assert_eq!(
        session.team_member("t1", "alice").unwrap().team_nick.as_deref(),
        Some("Al")
    );
}
