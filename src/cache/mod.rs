//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地实体缓存存储：单级键值缓存和两级嵌套缓存。

pub mod keyed;
pub(crate) mod lock;
pub mod nested;

pub use keyed::KeyedCache;
pub use nested::NestedKeyedCache;
