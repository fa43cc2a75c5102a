//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层依赖的外部协作者接口：远程获取和本地快照加载。

pub mod memory;

use crate::error::FetchResult;
use crate::model::{EntityKey, Team, TeamMember, UserProfile};
use async_trait::async_trait;

pub use memory::InMemoryRemote;

/// 远程实体获取接口
///
/// 由传输/会话层实现。实现方自行决定重试策略，缓存层不做重试。
#[async_trait]
pub trait EntityFetcher<K, V>: Send + Sync + 'static
where
    K: EntityKey,
    V: Send + 'static,
{
    /// 获取单个实体
    async fn fetch_one(&self, key: &K) -> FetchResult<V>;

    /// 批量获取实体
    ///
    /// 默认逐个调用 `fetch_one`，遇到第一个失败即返回
    async fn fetch_many(&self, keys: &[K]) -> FetchResult<Vec<V>> {
        futures::future::try_join_all(keys.iter().map(|k| self.fetch_one(k))).await
    }
}

/// 本地快照接口
///
/// 会话开始时同步读取全部本地数据用于预热缓存，
/// 以及在特定调用点作为同步回源。
pub trait LocalStore: Send + Sync + 'static {
    fn load_all_users(&self) -> Vec<UserProfile>;

    fn load_all_teams(&self) -> Vec<Team>;

    fn load_team(&self, team_id: &str) -> Option<Team>;

    fn load_team_member(&self, team_id: &str, account: &str) -> Option<TeamMember>;
}
