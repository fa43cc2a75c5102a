//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了会话上下文，负责组装缓存、请求合并器、变更通知器和同步闸门。
//!
//! 每次登录创建一个会话，注销时清空全部缓存状态。

use crate::cache::{KeyedCache, NestedKeyedCache};
use crate::config::Config;
use crate::error::FetchResult;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::model::{Entity, MemberKey, Team, TeamMember, TeamType, UserProfile};
use crate::remote::{EntityFetcher, InMemoryRemote, LocalStore};
use crate::sync::{
    ChangeNotifier, ChangeObserver, PushEvent, RequestCoalescer, SessionEvent, Subscription,
    SyncGate, SyncOutcome, SyncState, SyncStatus,
};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// 会话依赖的外部协作者
pub struct SessionDeps {
    pub users: Arc<dyn EntityFetcher<String, UserProfile>>,
    pub teams: Arc<dyn EntityFetcher<String, Team>>,
    pub members: Arc<dyn EntityFetcher<String, Vec<TeamMember>>>,
    pub member: Arc<dyn EntityFetcher<MemberKey, TeamMember>>,
    pub local: Arc<dyn LocalStore>,
}

impl SessionDeps {
    /// 所有协作者都由同一个内存数据源提供
    pub fn in_memory(remote: Arc<InMemoryRemote>) -> Self {
        Self {
            users: remote.clone(),
            teams: remote.clone(),
            members: remote.clone(),
            member: remote.clone(),
            local: remote,
        }
    }
}

type MemberCache = NestedKeyedCache<String, String, TeamMember>;

fn member_rejected(reject_empty_keys: bool, member: &TeamMember) -> bool {
    reject_empty_keys && (member.team_id.is_empty() || member.account.is_empty())
}

/// 群成员表获取
///
/// 远程返回的权威列表在分发给等待者之前整体写入缓存，每次远程调用只写一次。
/// 获取期间该群被推送更新过或会话已注销时不写入。
struct MemberListLoader {
    remote: Arc<dyn EntityFetcher<String, Vec<TeamMember>>>,
    members: Arc<MemberCache>,
    reject_empty_keys: bool,
}

#[async_trait]
impl EntityFetcher<String, Vec<TeamMember>> for MemberListLoader {
    async fn fetch_one(&self, team_id: &String) -> FetchResult<Vec<TeamMember>> {
        let since = self.members.revision();
        let list = self.remote.fetch_one(team_id).await?;
        let installed = self.members.replace_children_since(
            team_id.clone(),
            list.iter()
                .filter(|m| !member_rejected(self.reject_empty_keys, m))
                .map(|m| (m.account.clone(), m.clone())),
            since,
        );
        if !installed {
            debug!("member list for {} superseded while in flight, not installed", team_id);
        }
        Ok(list)
    }
}

/// 单个群成员获取，结果按增量更新写入缓存
struct MemberLoader {
    remote: Arc<dyn EntityFetcher<MemberKey, TeamMember>>,
    members: Arc<MemberCache>,
    reject_empty_keys: bool,
}

#[async_trait]
impl EntityFetcher<MemberKey, TeamMember> for MemberLoader {
    async fn fetch_one(&self, key: &MemberKey) -> FetchResult<TeamMember> {
        let since = self.members.revision();
        let member = self.remote.fetch_one(key).await?;
        if member_rejected(self.reject_empty_keys, &member) {
            warn!("fetched member with empty key dropped: {:?}", member);
        } else if !self.members.merge_child_since(
            member.team_id.clone(),
            member.account.clone(),
            member.clone(),
            since,
        ) {
            debug!("member {:?} superseded while in flight, not merged", key);
        }
        Ok(member)
    }
}

/// 会话上下文
///
/// 显式构造、按引用传递给使用方，生命周期与一次登录绑定。
/// 所有读接口都只查本地缓存，立即返回且从不失败。
pub struct Session {
    id: String,
    metrics: Arc<CacheMetrics>,
    users: KeyedCache<String, UserProfile>,
    teams: KeyedCache<String, Team>,
    members: Arc<MemberCache>,
    user_fetcher: RequestCoalescer<String, UserProfile>,
    team_fetcher: RequestCoalescer<String, Team>,
    member_list_fetcher: RequestCoalescer<String, Vec<TeamMember>>,
    member_fetcher: RequestCoalescer<MemberKey, TeamMember>,
    user_changes: ChangeNotifier<UserProfile>,
    team_changes: ChangeNotifier<Team>,
    member_changes: ChangeNotifier<TeamMember>,
    gate: SyncGate,
    local: Arc<dyn LocalStore>,
    reject_empty_keys: bool,
}

impl Session {
    /// 创建会话
    ///
    /// # 参数
    ///
    /// * `config` - 配置
    /// * `deps` - 远程获取和本地快照的实现
    ///
    /// # 返回值
    ///
    /// 空缓存的会话，调用 `build_cache` 预热
    pub fn new(config: &Config, deps: SessionDeps) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        let reject_empty = config.cache.reject_empty_keys;
        let members = Arc::new(MemberCache::new());
        let id = uuid::Uuid::new_v4().to_string();
        info!(
            "creating session {}, sync timeout={}ms",
            id, config.sync_gate.timeout_ms
        );

        Self {
            id,
            users: KeyedCache::with_options(reject_empty),
            teams: KeyedCache::with_options(reject_empty),
            user_fetcher: RequestCoalescer::new("users", deps.users).with_metrics(metrics.clone()),
            team_fetcher: RequestCoalescer::new("teams", deps.teams).with_metrics(metrics.clone()),
            member_list_fetcher: RequestCoalescer::new(
                "team_members",
                Arc::new(MemberListLoader {
                    remote: deps.members,
                    members: members.clone(),
                    reject_empty_keys: reject_empty,
                }),
            )
            .with_metrics(metrics.clone()),
            member_fetcher: RequestCoalescer::new(
                "team_member",
                Arc::new(MemberLoader {
                    remote: deps.member,
                    members: members.clone(),
                    reject_empty_keys: reject_empty,
                }),
            )
            .with_metrics(metrics.clone()),
            members,
            user_changes: ChangeNotifier::new("user_changes"),
            team_changes: ChangeNotifier::new("team_changes"),
            member_changes: ChangeNotifier::new("member_changes"),
            gate: SyncGate::from_config(&config.sync_gate),
            local: deps.local,
            reject_empty_keys: reject_empty,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn sync_state(&self) -> SyncState {
        self.gate.state()
    }

    /// 用本地快照预热用户和群缓存，不发出任何变更通知
    ///
    /// # 返回值
    ///
    /// 写入的用户数和群数
    #[instrument(skip(self), level = "debug", fields(session = %self.id))]
    pub fn build_cache(&self) -> (usize, usize) {
        let users = self
            .users
            .put_all(self.local.load_all_users().into_iter().map(|u| (u.key(), u)));
        let teams = self
            .teams
            .put_all(self.local.load_all_teams().into_iter().map(|t| (t.key(), t)));
        info!("build cache completed, users={}, teams={}", users, teams);
        (users, teams)
    }

    /// 处理一条远程推送
    ///
    /// 先写缓存，再按登记顺序整批通知观察者
    #[instrument(skip(self, event), level = "debug", fields(session = %self.id))]
    pub fn apply_push(&self, event: PushEvent) {
        if event.is_empty() {
            debug!("empty push ignored");
            return;
        }

        let failures = match event {
            PushEvent::UsersChanged { users } => {
                let accepted: Vec<UserProfile> = users
                    .into_iter()
                    .filter(|u| self.users.put(u.key(), u.clone()))
                    .collect();
                self.metrics.record_push_updates(accepted.len());
                debug!("users changed, size={}", accepted.len());
                self.user_changes.notify_changed(&accepted)
            }
            PushEvent::TeamsChanged { teams } => {
                let accepted: Vec<Team> = teams
                    .into_iter()
                    .filter(|t| self.teams.put(t.key(), t.clone()))
                    .collect();
                self.metrics.record_push_updates(accepted.len());
                debug!("teams changed, size={}", accepted.len());
                self.team_changes.notify_changed(&accepted)
            }
            PushEvent::TeamRemoved { mut team } => {
                // 退出的群仍然保留，界面需要显示它的名称
                team.is_my_team = false;
                if !self.teams.put(team.key(), team.clone()) {
                    warn!("team removal with empty id dropped");
                    return;
                }
                self.metrics.record_push_removal();
                info!("team removed, id={}", team.id);
                self.team_changes.notify_removed(&team)
            }
            PushEvent::MembersChanged { members } => {
                let accepted = self.merge_members(members);
                self.metrics.record_push_updates(accepted.len());
                debug!("team members changed, size={}", accepted.len());
                self.member_changes.notify_changed(&accepted)
            }
            PushEvent::MemberRemoved { mut member } => {
                member.in_team = false;
                let Some(member) = self.merge_members(vec![member]).pop() else {
                    return;
                };
                self.metrics.record_push_removal();
                debug!(
                    "team member removed, team={}, account={}",
                    member.team_id, member.account
                );
                self.member_changes.notify_removed(&member)
            }
        };

        if failures > 0 {
            self.metrics.record_observer_failures(failures);
        }
    }

    /// 增量写入群成员，返回被接受的成员
    fn merge_members(&self, members: Vec<TeamMember>) -> Vec<TeamMember> {
        members
            .into_iter()
            .filter(|member| {
                if member_rejected(self.reject_empty_keys, member) {
                    warn!("member with empty key dropped: {:?}", member);
                    return false;
                }
                self.members.merge_child(
                    member.team_id.clone(),
                    member.account.clone(),
                    member.clone(),
                );
                true
            })
            .collect()
    }

    /// 处理一条会话事件
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Push(push) => self.apply_push(push),
            SessionEvent::SyncStatus(status) => self.on_sync_status(status),
        }
    }

    /// 在后台消费事件流，流结束时任务退出
    ///
    /// 必须在 tokio 运行时内调用
    pub fn run_events<S>(self: &Arc<Self>, events: S) -> JoinHandle<()>
    where
        S: Stream<Item = SessionEvent> + Send + 'static,
    {
        let session = Arc::clone(self);
        debug!("session {}: event loop started", session.id);
        tokio::spawn(async move {
            let mut events = Box::pin(events);
            let mut handled = 0u64;
            while let Some(event) = events.next().await {
                session.handle_event(event);
                handled += 1;
            }
            debug!(
                "session {}: event stream closed, handled={}",
                session.id, handled
            );
        })
    }

    pub fn on_sync_status(&self, status: SyncStatus) {
        self.gate.on_status_event(status);
    }

    /// 等待首次同步完成，语义同 [`SyncGate::await_completion`]
    pub fn await_sync_completed<F>(&self, observer: F) -> bool
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.gate.await_completion(observer)
    }

    pub async fn wait_sync_completed(&self) -> SyncOutcome {
        self.gate.wait().await
    }

    /// 注销：清空所有缓存，闸门回到未开始且不通知等待者
    ///
    /// 在途的远程请求仍会完成并通知调用者，但不再写入本会话的缓存
    #[instrument(skip(self), level = "debug", fields(session = %self.id))]
    pub fn logout(&self) {
        self.users.clear();
        self.teams.clear();
        self.members.clear_all();
        self.gate.reset();
        info!("session {} logged out", self.id);
    }

    // ---- 本地读取 ----

    pub fn user(&self, account: &str) -> Option<UserProfile> {
        let user = self.users.get(&account.to_string());
        self.metrics.record_lookup(user.is_some());
        user
    }

    pub fn has_user(&self, account: &str) -> bool {
        self.users.has(&account.to_string())
    }

    pub fn all_users(&self) -> Vec<UserProfile> {
        self.users.values()
    }

    pub fn team(&self, team_id: &str) -> Option<Team> {
        let team = self.teams.get(&team_id.to_string());
        self.metrics.record_lookup(team.is_some());
        team
    }

    /// 当前仍在其中的群
    pub fn all_teams(&self) -> Vec<Team> {
        self.teams.filter_values(|t| t.is_my_team)
    }

    pub fn teams_by_type(&self, team_type: TeamType) -> Vec<Team> {
        self.teams
            .filter_values(|t| t.is_my_team && t.team_type == team_type)
    }

    /// 群内当前成员（已移出的成员不返回）
    pub fn team_members(&self, team_id: &str) -> Vec<TeamMember> {
        self.members
            .get_children(&team_id.to_string())
            .into_iter()
            .filter(|m| m.in_team)
            .collect()
    }

    pub fn team_member(&self, team_id: &str, account: &str) -> Option<TeamMember> {
        let member = self
            .members
            .get_child(&team_id.to_string(), &account.to_string());
        self.metrics.record_lookup(member.is_some());
        member
    }

    /// 查找群成员，未命中时同步回源本地快照并写入缓存
    pub fn team_member_or_load(&self, team_id: &str, account: &str) -> Option<TeamMember> {
        if let Some(member) = self.team_member(team_id, account) {
            return Some(member);
        }
        let member = self.local.load_team_member(team_id, account)?;
        debug!("team member loaded from local store, team={}, account={}", team_id, account);
        self.merge_members(vec![member.clone()]);
        Some(member)
    }

    /// 查找群，未命中时同步回源本地快照并写入缓存
    pub fn team_or_load(&self, team_id: &str) -> Option<Team> {
        if let Some(team) = self.team(team_id) {
            return Some(team);
        }
        let team = self.local.load_team(team_id)?;
        debug!("team loaded from local store, id={}", team_id);
        self.teams.put(team.key(), team.clone());
        Some(team)
    }

    // ---- 远程获取 ----

    /// 获取用户资料（合并并发请求，不写缓存）
    pub async fn fetch_user(&self, account: &str) -> FetchResult<UserProfile> {
        self.user_fetcher.fetch(account.to_string()).await
    }

    /// 批量获取用户资料（不合并，不写缓存）
    pub async fn fetch_users(&self, accounts: Vec<String>) -> FetchResult<Vec<UserProfile>> {
        self.user_fetcher.fetch_all(accounts).await
    }

    /// 获取群资料（合并并发请求，不写缓存）
    pub async fn fetch_team(&self, team_id: &str) -> FetchResult<Team> {
        self.team_fetcher.fetch(team_id.to_string()).await
    }

    /// 获取群成员列表（回调形式）
    ///
    /// 同一个群的并发请求合并为一次远程调用。成功时返回的是权威的完整成员表，
    /// 在调用任何回调之前整体替换该群在缓存中的成员（仅一次）。
    /// 请求在途期间该群收到推送或会话注销时，列表只交给调用者，不写缓存。
    pub fn fetch_team_members_with<F>(&self, team_id: &str, callback: F)
    where
        F: FnOnce(FetchResult<Vec<TeamMember>>) + Send + 'static,
    {
        self.member_list_fetcher
            .fetch_one(team_id.to_string(), callback);
    }

    /// 获取群成员列表（异步形式）
    pub async fn fetch_team_members(&self, team_id: &str) -> FetchResult<Vec<TeamMember>> {
        self.member_list_fetcher.fetch(team_id.to_string()).await
    }

    /// 获取单个群成员（回调形式）
    ///
    /// 同一成员的并发请求合并为一次远程调用，成功时按增量更新写入缓存，不发出变更通知
    pub fn fetch_team_member_with<F>(&self, team_id: &str, account: &str, callback: F)
    where
        F: FnOnce(FetchResult<TeamMember>) + Send + 'static,
    {
        self.member_fetcher
            .fetch_one(MemberKey::new(team_id, account), callback);
    }

    /// 获取单个群成员（异步形式）
    pub async fn fetch_team_member(&self, team_id: &str, account: &str) -> FetchResult<TeamMember> {
        self.member_fetcher
            .fetch(MemberKey::new(team_id, account))
            .await
    }

    // ---- 观察者 ----

    pub fn register_user_observer(
        &self,
        observer: Arc<dyn ChangeObserver<UserProfile>>,
    ) -> Subscription {
        self.user_changes.register(observer)
    }

    pub fn register_team_observer(&self, observer: Arc<dyn ChangeObserver<Team>>) -> Subscription {
        self.team_changes.register(observer)
    }

    pub fn register_member_observer(
        &self,
        observer: Arc<dyn ChangeObserver<TeamMember>>,
    ) -> Subscription {
        self.member_changes.register(observer)
    }

    pub fn unregister_user_observer(&self, observer: &Arc<dyn ChangeObserver<UserProfile>>) -> bool {
        self.user_changes.unregister(observer)
    }

    pub fn unregister_team_observer(&self, observer: &Arc<dyn ChangeObserver<Team>>) -> bool {
        self.team_changes.unregister(observer)
    }

    pub fn unregister_member_observer(
        &self,
        observer: &Arc<dyn ChangeObserver<TeamMember>>,
    ) -> bool {
        self.member_changes.unregister(observer)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("users", &self.users.len())
            .field("teams", &self.teams.len())
            .field("sync_state", &self.gate.state())
            .finish()
    }
}
