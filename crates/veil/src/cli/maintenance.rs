use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use veil_route::{compile as compile_config, CompileOptions};
use veil_store::{select_server, AppConfig, AppPaths, ServerStore};
use veil_vpn::{
    run_recovery, traffic_log, CommandRunner, FirewallController, NetworkSetupProxy, PfFirewall,
    RecoveryOutcome, RecoveryStore, SystemRunner, ANCHOR,
};

#[derive(Parser, Debug, Clone)]
pub struct CompileArgs {
    /// Server id or part of its name; defaults to the last used server
    pub query: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct LogsArgs {
    /// Number of entries to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub lines: usize,
}

pub fn show_config(paths: &AppPaths) -> Result<()> {
    let path = paths.config_file();
    let config = AppConfig::load(&path).context("loading config")?;

    println!("Config file: {}\n", path.display());
    println!("Current configuration:");
    println!("  proxy:");
    println!("    socks_port: {}", config.proxy.socks_port);
    println!("    http_port:  {}", config.proxy.http_port);
    println!("  server:");
    println!("    last_used:  {}", config.server.last_used);
    println!("  split_tunnel:");
    println!("    enabled:    {}", config.split_tunnel.enabled);
    println!("    mode:       {}", config.split_tunnel.mode);
    println!("    rules:      {}", config.split_tunnel.rules.len());
    println!("  engine:");
    println!("    binary:     {}", config.engine.binary);
    Ok(())
}

pub async fn cleanup(paths: &AppPaths) -> Result<()> {
    let store = RecoveryStore::new(paths.state_file());
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let proxy = NetworkSetupProxy::new(runner.clone());

    match run_recovery(&store, &proxy).await? {
        RecoveryOutcome::Clean => println!("No dirty proxy state found. System is clean."),
        RecoveryOutcome::Reverted {
            network_service,
            socks_port,
            http_port,
            pid,
            proxy_error,
        } => {
            println!("Found dirty proxy state from previous session:");
            println!("  Network service: {}", network_service);
            println!("  SOCKS port:      {}", socks_port);
            println!("  HTTP port:       {}", http_port);
            println!("  PID:             {}", pid);
            println!();
            match proxy_error {
                Some(e) => println!("Warning: failed to unset system proxy: {}", e),
                None => println!("Reversed system proxy on: {}", network_service),
            }
            println!("Proxy state cleaned.");
        }
    }

    if PfFirewall::new(runner).is_active().await {
        println!();
        println!("Kill switch rules are still loaded. To remove them run:");
        println!("  sudo pfctl -a {} -F all", ANCHOR);
    }
    Ok(())
}

pub fn compile(args: CompileArgs, paths: &AppPaths) -> Result<()> {
    let config = AppConfig::load(&paths.config_file()).context("loading config")?;
    let store = ServerStore::open(paths.servers_file()).context("loading servers")?;
    let servers = store.list();
    let server = select_server(&servers, args.query.as_deref(), config.last_used())?;

    let options = CompileOptions {
        socks_port: config.proxy.socks_port,
        http_port: config.proxy.http_port,
        split_tunnel: config.active_split_tunnel(),
        access_log: Some(paths.access_log().display().to_string()),
    };
    let compiled = compile_config(server, &options)?;
    println!("{}", compiled.to_json_pretty()?);
    Ok(())
}

pub fn logs(args: LogsArgs, paths: &AppPaths) -> Result<()> {
    let path = paths.access_log();
    let entries = traffic_log::recent(&path, args.lines).context("reading access log")?;
    if entries.is_empty() {
        println!("No traffic logged yet. Connect first with: veil connect");
        return Ok(());
    }

    for entry in entries {
        println!("{}  {:<7}  {}", entry.time, entry.route, entry.destination);
    }
    Ok(())
}
