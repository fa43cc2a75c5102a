//! oxsync - 客户端实体缓存同步层
//!
//! 为用户资料、群组和群成员提供本地键值缓存、远程请求合并、
//! 变更通知以及初始同步闸门，所有状态由显式构造的会话持有。

#![doc(html_root_url = "https://docs.rs/oxsync/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod remote;
pub mod session;
pub mod sync;
pub mod telemetry;

// Re-export commonly used items
pub use cache::{KeyedCache, NestedKeyedCache};
pub use config::Config;
pub use error::{CacheError, FetchError, FetchResult, Result};
pub use model::{Entity, EntityKey, MemberKey, Team, TeamMember, TeamType, UserProfile};
pub use remote::{EntityFetcher, LocalStore};
pub use session::{Session, SessionDeps};
pub use sync::{
    ChangeNotifier, ChangeObserver, PushEvent, RequestCoalescer, SessionEvent, Subscription,
    SyncGate, SyncOutcome, SyncState, SyncStatus,
};

/// oxsync 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
