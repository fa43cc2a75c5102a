//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了配置校验命令的实现。

use crate::cli::CheckConfigArgs;
use crate::config::Config;
use anyhow::{Context, Result};

pub fn execute(args: &CheckConfigArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Invalid configuration file '{}'", args.config.display()))?;

    println!("✅ {} is valid", args.config.display());
    println!("  sync_gate.timeout_ms:     {}", config.sync_gate.timeout_ms);
    println!("  cache.reject_empty_keys:  {}", config.cache.reject_empty_keys);
    println!("  logging.filter:           {}", config.logging.filter);
    Ok(())
}
