//! Veil: Command-Line VPN Client
//!
//! Main entry point. Installs the global allocator and logging, prints the
//! kill switch banner when a previous session left one behind, then
//! dispatches the subcommand.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Commands};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use veil_store::AppPaths;
use veil_vpn::{kill_switch_notice, RecoveryStore};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let paths = AppPaths::discover()?;

    if !matches!(args.command, Commands::Cleanup) {
        if let Some(notice) = kill_switch_notice(&RecoveryStore::new(paths.state_file())) {
            println!("{}\n", notice);
        }
    }

    cli::run(args.command, &paths).await
}
