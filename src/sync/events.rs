//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了传输层推送给缓存层的事件类型。

use super::gate::SyncStatus;
use crate::model::{Team, TeamMember, UserProfile};
use serde::{Deserialize, Serialize};

/// 远程实体变更推送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// 用户资料新增或更新
    UsersChanged { users: Vec<UserProfile> },
    /// 群资料新增或更新
    TeamsChanged { teams: Vec<Team> },
    /// 自己退群、被踢或群解散；附带的群资料仍需保留用于展示
    TeamRemoved { team: Team },
    /// 群成员资料新增或更新
    MembersChanged { members: Vec<TeamMember> },
    /// 群成员被移出
    MemberRemoved { member: TeamMember },
}

impl PushEvent {
    /// 事件携带的实体数量
    pub fn len(&self) -> usize {
        match self {
            PushEvent::UsersChanged { users } => users.len(),
            PushEvent::TeamsChanged { teams } => teams.len(),
            PushEvent::MembersChanged { members } => members.len(),
            PushEvent::TeamRemoved { .. } | PushEvent::MemberRemoved { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 会话事件流中的单个事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Push(PushEvent),
    SyncStatus(SyncStatus),
}

impl From<PushEvent> for SessionEvent {
    fn from(event: PushEvent) -> Self {
        SessionEvent::Push(event)
    }
}

impl From<SyncStatus> for SessionEvent {
    fn from(status: SyncStatus) -> Self {
        SessionEvent::SyncStatus(status)
    }
}
