//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存的同步机制，包括请求合并、变更通知、推送事件和初始同步闸门。

pub mod coalescer;
pub mod events;
pub mod gate;
pub mod notifier;

pub use coalescer::RequestCoalescer;
pub use events::{PushEvent, SessionEvent};
pub use gate::{SyncGate, SyncOutcome, SyncState, SyncStatus};
pub use notifier::{ChangeNotifier, ChangeObserver, Subscription};
