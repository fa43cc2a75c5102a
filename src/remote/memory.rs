//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 内存数据源：同时充当远程服务和本地快照，用于命令行回放和测试。

use super::{EntityFetcher, LocalStore};
use crate::cache::lock::{rw_read, rw_write};
use crate::error::{FetchError, FetchResult};
use crate::model::{MemberKey, Team, TeamMember, UserProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// 实体不存在时返回的错误码
pub const NOT_FOUND: u16 = 404;

/// 数据集
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub users: Vec<UserProfile>,
    pub teams: Vec<Team>,
    pub members: Vec<TeamMember>,
}

/// 内存数据源
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    data: RwLock<Dataset>,
    latency: Duration,
    fetches: AtomicU64,
}

impl InMemoryRemote {
    pub fn new(data: Dataset) -> Self {
        Self {
            data: RwLock::new(data),
            latency: Duration::ZERO,
            fetches: AtomicU64::new(0),
        }
    }

    /// 为每次远程调用增加固定延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 已处理的远程调用次数
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// 修改远程数据（模拟服务端变更）
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Dataset),
    {
        f(&mut rw_write(&self.data, "memory.update"));
    }

    async fn round_trip(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl EntityFetcher<String, UserProfile> for InMemoryRemote {
    async fn fetch_one(&self, key: &String) -> FetchResult<UserProfile> {
        self.round_trip().await;
        debug!("InMemoryRemote fetch user: {}", key);
        rw_read(&self.data, "memory.fetch_user")
            .users
            .iter()
            .find(|u| &u.account == key)
            .cloned()
            .ok_or(FetchError::Domain { code: NOT_FOUND })
    }

    async fn fetch_many(&self, keys: &[String]) -> FetchResult<Vec<UserProfile>> {
        self.round_trip().await;
        let data = rw_read(&self.data, "memory.fetch_users");
        // 批量接口只返回存在的用户，不因个别缺失而失败
        Ok(data
            .users
            .iter()
            .filter(|u| keys.contains(&u.account))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityFetcher<String, Team> for InMemoryRemote {
    async fn fetch_one(&self, key: &String) -> FetchResult<Team> {
        self.round_trip().await;
        rw_read(&self.data, "memory.fetch_team")
            .teams
            .iter()
            .find(|t| &t.id == key)
            .cloned()
            .ok_or(FetchError::Domain { code: NOT_FOUND })
    }
}

#[async_trait]
impl EntityFetcher<String, Vec<TeamMember>> for InMemoryRemote {
    async fn fetch_one(&self, key: &String) -> FetchResult<Vec<TeamMember>> {
        self.round_trip().await;
        let data = rw_read(&self.data, "memory.fetch_members");
        if !data.teams.iter().any(|t| &t.id == key) {
            return Err(FetchError::Domain { code: NOT_FOUND });
        }
        Ok(data
            .members
            .iter()
            .filter(|m| &m.team_id == key)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityFetcher<MemberKey, TeamMember> for InMemoryRemote {
    async fn fetch_one(&self, key: &MemberKey) -> FetchResult<TeamMember> {
        self.round_trip().await;
        rw_read(&self.data, "memory.fetch_member")
            .members
            .iter()
            .find(|m| m.team_id == key.team_id && m.account == key.account)
            .cloned()
            .ok_or(FetchError::Domain { code: NOT_FOUND })
    }
}

impl LocalStore for InMemoryRemote {
    fn load_all_users(&self) -> Vec<UserProfile> {
        rw_read(&self.data, "memory.load_all_users").users.clone()
    }

    fn load_all_teams(&self) -> Vec<Team> {
        rw_read(&self.data, "memory.load_all_teams").teams.clone()
    }

    fn load_team(&self, team_id: &str) -> Option<Team> {
        rw_read(&self.data, "memory.load_team")
            .teams
            .iter()
            .find(|t| t.id == team_id)
            .cloned()
    }

    fn load_team_member(&self, team_id: &str, account: &str) -> Option<TeamMember> {
        rw_read(&self.data, "memory.load_team_member")
            .members
            .iter()
            .find(|m| m.team_id == team_id && m.account == account)
            .cloned()
    }
}
