use anyhow::{Context, Result};
use clap::Subcommand;
use veil_proto::{parse_uri, ServerDescriptor};
use veil_store::{subscription, AppPaths, ServerStore};
use veil_vpn::{latency, PROBE_TIMEOUT};

#[derive(Subcommand, Debug)]
pub enum ServersCommand {
    /// Add a server from a share link
    Add {
        /// vless://, vmess://, trojan:// or ss:// link
        uri: String,
    },
    /// List saved servers
    List,
    /// Remove a server by id
    Remove { id: String },
    /// Remove every saved server
    Clear,
    /// Measure TCP connect latency to every server
    Ping,
}

#[derive(Subcommand, Debug)]
pub enum SubscriptionCommand {
    /// Fetch a subscription and add its servers
    Add { url: String },
    /// Re-fetch a subscription, replacing its servers
    Refresh { url: String },
}

pub async fn run(command: ServersCommand, paths: &AppPaths) -> Result<()> {
    let store = ServerStore::open(paths.servers_file()).context("loading servers")?;

    match command {
        ServersCommand::Add { uri } => {
            let server = parse_uri(&uri).context("invalid share link")?;
            let server = store.add(server).context("saving server")?;
            println!(
                "Added {} server {} ({}) [{}]",
                server.protocol,
                server.name,
                server.endpoint(),
                server.id
            );
        }
        ServersCommand::List => print_servers(&store.list()),
        ServersCommand::Remove { id } => {
            let removed = store.remove(&id)?;
            println!("Removed {}", removed.name);
        }
        ServersCommand::Clear => {
            let count = store.count();
            store.clear().context("saving servers")?;
            println!("Removed {} servers", count);
        }
        ServersCommand::Ping => ping(&store).await?,
    }
    Ok(())
}

pub async fn run_subscription(command: SubscriptionCommand, paths: &AppPaths) -> Result<()> {
    let store = ServerStore::open(paths.servers_file()).context("loading servers")?;
    let (url, verb) = match &command {
        SubscriptionCommand::Add { url } => (url, "Imported"),
        SubscriptionCommand::Refresh { url } => (url, "Refreshed"),
    };

    println!("Fetching {}...", url);
    let servers = subscription::fetch(url).await?;
    let count = servers.len();
    store
        .replace_by_source(url, servers)
        .context("saving servers")?;
    println!("{} {} servers from subscription", verb, count);
    Ok(())
}

async fn ping(store: &ServerStore) -> Result<()> {
    let servers = store.list();
    if servers.is_empty() {
        println!("No servers to ping");
        return Ok(());
    }

    println!("Pinging {} servers...", servers.len());
    let results = latency::probe_all(&servers, PROBE_TIMEOUT).await;

    for result in results {
        if let Some(mut server) = store.find_by_id(&result.server_id) {
            server.latency_ms = Some(result.latency_ms);
            store.update(server).context("saving latency")?;
        }
    }

    print_servers(&store.list());
    Ok(())
}

fn print_servers(servers: &[ServerDescriptor]) {
    if servers.is_empty() {
        println!("No servers. Add one with: veil servers add <uri>");
        return;
    }

    println!("{:<36}  {:<24}  {:<11}  {:>8}  ENDPOINT", "ID", "NAME", "PROTOCOL", "LATENCY");
    for s in servers {
        let latency = match s.latency_ms {
            Some(ms) if ms >= 0 => format!("{}ms", ms),
            Some(_) => "timeout".to_string(),
            None => "-".to_string(),
        };
        let source = if s.is_subscribed() { " (sub)" } else { "" };
        println!(
            "{:<36}  {:<24}  {:<11}  {:>8}  {}{}",
            s.id,
            truncate(&s.name, 24),
            s.protocol.as_str(),
            latency,
            s.endpoint(),
            source
        );
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('~');
    out
}
