//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "replay", about = "Replay a session event script against an in-memory store")]
    Replay(ReplayArgs),

    #[command(name = "check-config", about = "Validate a configuration file")]
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ReplayArgs {
    #[arg(short, long, help = "JSON script with a dataset and an event list")]
    pub script: PathBuf,

    #[arg(short, long, help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Output in JSON format")]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CheckConfigArgs {
    #[arg(short, long, help = "TOML configuration file")]
    pub config: PathBuf,
}

mod check_config;
mod replay;

pub use replay::{replay_script, ReplayReport, ReplayScript};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Replay(args) => replay::execute(args).await,
        Commands::CheckConfig(args) => check_config::execute(args),
    }
}
