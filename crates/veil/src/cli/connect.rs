use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::warn;
use veil_store::{select_server, AppConfig, AppPaths, ServerStore};
use std::future::Future;
use veil_vpn::{
    direct_ip, traffic_log, CommandRunner, ConnectOptions, DnsResolver, Engine,
    NetworkSetupProxy, PfFirewall, RecoveryStore, Session, StartRequest, SystemRunner,
    XrayProcessBackend,
};

#[derive(Parser, Debug, Clone)]
pub struct ConnectArgs {
    /// Server id or part of its name; defaults to the last used server
    pub query: Option<String>,
    /// Block all traffic outside the tunnel while connected
    #[arg(long = "kill-switch", default_value_t = false)]
    pub kill_switch: bool,
}

/// Build a session wired to the host
pub fn host_session(paths: &AppPaths, config: &AppConfig) -> Session {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let backend = XrayProcessBackend::new(config.engine.binary.clone(), paths.engine_config());
    Session::new(
        Engine::new(Arc::new(backend)),
        Arc::new(NetworkSetupProxy::new(runner.clone())),
        Arc::new(PfFirewall::new(runner)),
        Arc::new(DnsResolver::new()),
        RecoveryStore::new(paths.state_file()),
    )
}

pub async fn run(args: ConnectArgs, paths: &AppPaths) -> Result<()> {
    let config_path = paths.config_file();
    let mut config = AppConfig::load(&config_path).context("loading config")?;
    let store = ServerStore::open(paths.servers_file()).context("loading servers")?;

    let servers = store.list();
    let server = select_server(&servers, args.query.as_deref(), config.last_used())?.clone();

    println!("Connecting to {} ({})...", server.name, server.endpoint());

    let access_log = paths.access_log();
    let access_log = match traffic_log::reset(&access_log) {
        Ok(()) => Some(access_log),
        Err(e) => {
            warn!("Traffic log disabled, could not reset {}: {}", access_log.display(), e);
            None
        }
    };

    let request = StartRequest {
        descriptor: server.clone(),
        socks_port: config.proxy.socks_port,
        http_port: config.proxy.http_port,
        split_tunnel: config.active_split_tunnel(),
        access_log,
    };
    let options = ConnectOptions {
        kill_switch: args.kill_switch,
        verify_exit: true,
    };

    let mut session = host_session(paths, &config);
    let report = session
        .connect(request, options)
        .await
        .context("starting proxy")?;

    println!(
        "Proxy started on socks5://127.0.0.1:{} and http://127.0.0.1:{}",
        config.proxy.socks_port, config.proxy.http_port
    );
    if report.kill_switch {
        println!("Kill switch enabled -- all non-VPN traffic blocked.");
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }

    if let Some(exit_ip) = &report.exit_ip {
        match direct_ip().await {
            Ok(direct) if direct != *exit_ip => {
                println!("Direct IP: {} -> Proxy IP: {} (routing confirmed)", direct, exit_ip)
            }
            Ok(_) => println!("Warning: Proxy IP matches direct IP -- routing may not be working"),
            Err(_) => println!("Connected! Your IP: {}", exit_ip),
        }
    }

    config.server.last_used = server.id.clone();
    if let Err(e) = config.save(&config_path) {
        warn!("Could not save config: {}", e);
        println!("Warning: could not save config: {}", e);
    }
    let mut connected = server.clone();
    connected.last_connected = Some(Utc::now());
    if let Err(e) = store.update(connected) {
        warn!("Could not update server: {}", e);
        println!("Warning: could not update server: {}", e);
    }

    println!("Status: connected | Server: {} | Press Ctrl+C to disconnect", server.name);

    hold_until(tokio::signal::ctrl_c(), &mut session).await
}

/// Wait for `interrupt`, then disconnect whatever the wait returned
async fn hold_until<F>(interrupt: F, session: &mut Session) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let interrupted = interrupt.await;

    println!("Disconnecting...");
    let report = session.disconnect().await;
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    println!("Disconnected.");
    interrupted.context("waiting for Ctrl+C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_vpn::RecoveryRecord;

    #[tokio::test]
    async fn test_signal_error_still_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let mut session = host_session(&paths, &AppConfig::default());

        // A record from this run; a clean disconnect deletes it
        let store = RecoveryStore::new(paths.state_file());
        store.write(&RecoveryRecord::default()).unwrap();

        let failed = async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        let result = hold_until(failed, &mut session).await;

        assert!(result.unwrap_err().to_string().contains("Ctrl+C"));
        assert!(store.load().unwrap().is_none());
    }
}
