pub mod connect;
pub mod maintenance;
pub mod servers;
pub mod split_tunnel;

use anyhow::Result;
use clap::{Parser, Subcommand};
use veil_store::AppPaths;

#[derive(Parser, Debug)]
#[command(name = "veil", version)]
#[command(about = "Command-line VPN client for vless, vmess, trojan and shadowsocks servers", long_about = None)]
pub struct Args {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect and stay connected until Ctrl+C
    Connect(connect::ConnectArgs),
    /// Manage saved servers
    #[command(subcommand)]
    Servers(servers::ServersCommand),
    /// Import servers from subscription URLs
    #[command(subcommand)]
    Subscription(servers::SubscriptionCommand),
    /// Manage split tunnel rules
    #[command(subcommand)]
    SplitTunnel(split_tunnel::SplitTunnelCommand),
    /// Show the current configuration
    Config,
    /// Revert system proxy settings left by a crashed session
    Cleanup,
    /// Print the engine configuration for a server
    Compile(maintenance::CompileArgs),
    /// Show recent connections and how they were routed
    Logs(maintenance::LogsArgs),
}

pub async fn run(command: Commands, paths: &AppPaths) -> Result<()> {
    match command {
        Commands::Connect(args) => connect::run(args, paths).await,
        Commands::Servers(cmd) => servers::run(cmd, paths).await,
        Commands::Subscription(cmd) => servers::run_subscription(cmd, paths).await,
        Commands::SplitTunnel(cmd) => split_tunnel::run(cmd, paths),
        Commands::Config => maintenance::show_config(paths),
        Commands::Cleanup => maintenance::cleanup(paths).await,
        Commands::Compile(args) => maintenance::compile(args, paths),
        Commands::Logs(args) => maintenance::logs(args, paths),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_connect() {
        let args = Args::parse_from(["veil", "connect", "tokyo", "--kill-switch"]);
        match args.command {
            Commands::Connect(c) => {
                assert_eq!(c.query.as_deref(), Some("tokyo"));
                assert!(c.kill_switch);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_split_tunnel_mode() {
        let args = Args::parse_from(["veil", "-v", "split-tunnel", "mode", "inclusive"]);
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Commands::SplitTunnel(split_tunnel::SplitTunnelCommand::Mode { .. })
        ));
    }

    #[test]
    fn test_parse_logs() {
        let args = Args::parse_from(["veil", "logs"]);
        assert!(matches!(args.command, Commands::Logs(ref l) if l.lines == 20));

        let args = Args::parse_from(["veil", "logs", "-n", "5"]);
        assert!(matches!(args.command, Commands::Logs(ref l) if l.lines == 5));
    }
}
