//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存的实体类型：用户资料、群组和群成员。

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// 实体键
///
/// 键按值精确比较，不做任何规范化
pub trait EntityKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    /// 键是否为空（空键在本地直接拒绝）
    fn is_empty_key(&self) -> bool;
}

impl EntityKey for String {
    fn is_empty_key(&self) -> bool {
        self.is_empty()
    }
}

/// 远程实体快照
///
/// 快照整体替换，不做字段级合并
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: EntityKey;

    fn key(&self) -> Self::Key;
}

/// 用户资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub account: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

impl UserProfile {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            name: None,
            avatar: None,
            signature: None,
            extension: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Entity for UserProfile {
    type Key = String;

    fn key(&self) -> String {
        self.account.clone()
    }
}

/// 群组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TeamType {
    /// 普通群
    #[default]
    Normal,
    /// 高级群
    Advanced,
}

/// 群组资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub team_type: TeamType,
    /// 自己是否仍在群中；退群、被踢或群解散后为 false，但资料仍保留
    #[serde(default = "default_true")]
    pub is_my_team: bool,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Team {
    pub fn new(id: impl Into<String>, team_type: TeamType) -> Self {
        Self {
            id: id.into(),
            name: None,
            team_type,
            is_my_team: true,
            icon: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Entity for Team {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// 群成员复合键 (群ID, 账号)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberKey {
    pub team_id: String,
    pub account: String,
}

impl MemberKey {
    pub fn new(team_id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            account: account.into(),
        }
    }
}

impl EntityKey for MemberKey {
    fn is_empty_key(&self) -> bool {
        self.team_id.is_empty() || self.account.is_empty()
    }
}

/// 群成员资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: String,
    pub account: String,
    #[serde(default)]
    pub team_nick: Option<String>,
    /// 是否仍在群中；被移出后保留资料并置为 false
    #[serde(default = "default_true")]
    pub in_team: bool,
}

impl TeamMember {
    pub fn new(team_id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            account: account.into(),
            team_nick: None,
            in_team: true,
        }
    }

    pub fn with_nick(mut self, nick: impl Into<String>) -> Self {
        self.team_nick = Some(nick.into());
        self
    }
}

impl Entity for TeamMember {
    type Key = MemberKey;

    fn key(&self) -> MemberKey {
        MemberKey::new(self.team_id.clone(), self.account.clone())
    }
}

fn default_true() -> bool {
    true
}
