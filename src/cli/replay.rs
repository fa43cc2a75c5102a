//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了事件回放命令：在内存数据源上构建会话并依次应用事件脚本。

use crate::cli::ReplayArgs;
use crate::config::Config;
use crate::metrics::MetricsSnapshot;
use crate::model::{Team, TeamMember, UserProfile};
use crate::remote::memory::Dataset;
use crate::remote::InMemoryRemote;
use crate::session::{Session, SessionDeps};
use crate::sync::{SessionEvent, SyncState};
use crate::telemetry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// 回放脚本
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayScript {
    /// 远程服务和本地快照共用的数据
    pub dataset: Dataset,
    /// 按顺序应用的会话事件
    pub events: Vec<SessionEvent>,
    /// 事件应用完毕后拉取权威成员表的群
    pub fetch_members: Vec<String>,
}

/// 回放结果
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub session: String,
    pub sync_state: SyncState,
    pub users: Vec<UserProfile>,
    pub teams: Vec<Team>,
    pub members: BTreeMap<String, Vec<TeamMember>>,
    pub metrics: MetricsSnapshot,
}

pub async fn execute(args: &ReplayArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => Config::default(),
    };
    telemetry::init_from_config(&config.logging);

    let content = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script '{}'", args.script.display()))?;
    let script: ReplayScript = serde_json::from_str(&content)
        .with_context(|| format!("Invalid replay script '{}'", args.script.display()))?;

    let report = replay_script(&config, script).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// 回放一个脚本并返回缓存内容
///
/// # 参数
///
/// * `config` - 会话配置
/// * `script` - 回放脚本
///
/// # 返回值
///
/// 所有事件和成员表拉取完成后的缓存快照
pub async fn replay_script(config: &Config, script: ReplayScript) -> Result<ReplayReport> {
    let remote = Arc::new(InMemoryRemote::new(script.dataset));
    let session = Arc::new(Session::new(config, SessionDeps::in_memory(remote)));
    session.build_cache();

    info!("replaying {} events", script.events.len());
    session
        .run_events(futures::stream::iter(script.events))
        .await
        .context("Event loop terminated abnormally")?;

    for team_id in &script.fetch_members {
        session
            .fetch_team_members(team_id)
            .await
            .with_context(|| format!("Failed to fetch members of team '{}'", team_id))?;
    }

    let mut users = session.all_users();
    users.sort_by(|a, b| a.account.cmp(&b.account));
    let mut teams = session.all_teams();
    teams.sort_by(|a, b| a.id.cmp(&b.id));

    let members = teams
        .iter()
        .map(|t| {
            let mut list = session.team_members(&t.id);
            list.sort_by(|a, b| a.account.cmp(&b.account));
            (t.id.clone(), list)
        })
        .filter(|(_, list)| !list.is_empty())
        .collect();

    Ok(ReplayReport {
        session: session.id().to_string(),
        sync_state: session.sync_state(),
        users,
        teams,
        members,
        metrics: session.metrics(),
    })
}

fn print_report(report: &ReplayReport) {
    println!("=== Replay Result ===\n");
    println!("Session:    {}", report.session);
    println!("Sync state: {:?}", report.sync_state);

    println!("\nUsers ({}):", report.users.len());
    for user in &report.users {
        println!(
            "  {:<16} {}",
            user.account,
            user.name.as_deref().unwrap_or("-")
        );
    }

    println!("\nTeams ({}):", report.teams.len());
    for team in &report.teams {
        let members = report.members.get(&team.id).map(|m| m.len()).unwrap_or(0);
        println!(
            "  {:<16} {:<24} {:?}, members={}",
            team.id,
            team.name.as_deref().unwrap_or("-"),
            team.team_type,
            members
        );
    }

    println!("\n=== Metrics ===\n");
    print!("{}", report.metrics.render(&report.session));
}
