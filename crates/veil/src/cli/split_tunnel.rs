use anyhow::{Context, Result};
use clap::Subcommand;
use veil_route::SplitMode;
use veil_store::{AppConfig, AppPaths};

#[derive(Subcommand, Debug)]
pub enum SplitTunnelCommand {
    /// Add a rule (IP, CIDR, domain, or *.domain)
    Add { rule: String },
    /// Remove a rule by value
    Remove { rule: String },
    /// Show mode and rules
    List,
    /// Set the mode: exclusive (listed bypass the tunnel) or inclusive
    Mode { mode: String },
    /// Turn split tunneling on
    Enable,
    /// Turn split tunneling off
    Disable,
    /// Remove every rule
    Clear,
}

pub fn run(command: SplitTunnelCommand, paths: &AppPaths) -> Result<()> {
    let path = paths.config_file();
    let mut config = AppConfig::load(&path).context("loading config")?;
    let mut policy = config.split_tunnel_policy();

    match command {
        SplitTunnelCommand::Add { rule } => {
            let added = policy.add_rule(&rule)?.clone();
            println!("Added {} rule: {}", added.kind, added.value);
        }
        SplitTunnelCommand::Remove { rule } => {
            let removed = policy.remove_rule(&rule)?;
            println!("Removed rule: {}", removed.value);
        }
        SplitTunnelCommand::List => {
            print_policy(&config);
            return Ok(());
        }
        SplitTunnelCommand::Mode { mode } => {
            policy.mode = mode.parse::<SplitMode>()?;
            println!("Split tunnel mode set to {}", policy.mode);
        }
        SplitTunnelCommand::Enable => {
            policy.enabled = true;
            println!("Split tunneling enabled");
            if policy.rules.is_empty() {
                println!("Warning: No rules configured. Add rules with: veil split-tunnel add <rule>");
            }
        }
        SplitTunnelCommand::Disable => {
            policy.enabled = false;
            println!("Split tunneling disabled");
        }
        SplitTunnelCommand::Clear => {
            policy.clear();
            println!("All split tunnel rules cleared");
        }
    }

    config.set_split_tunnel_policy(policy);
    config.save(&path).context("saving config")?;
    println!("Reconnect required for changes to take effect");
    Ok(())
}

fn print_policy(config: &AppConfig) {
    let section = &config.split_tunnel;
    let state = if section.enabled { "enabled" } else { "disabled" };
    println!("Split tunneling: {}", state);
    println!("Mode: {}", section.mode);

    if section.rules.is_empty() {
        println!("\nNo rules configured");
        return;
    }
    println!("\nRules ({}):", section.rules.len());
    for (i, rule) in section.rules.iter().enumerate() {
        println!("  {}. {:<30} [{}]", i + 1, rule.value, rule.kind);
    }
}
