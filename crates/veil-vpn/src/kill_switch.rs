//! Kill Switch
//!
//! Firewall-level leak protection: while active, the host may only talk
//! to the tunnel server, loopback, DHCP and DNS.
//!
//! # Behavior
//!
//! - Rules live in a dedicated pf anchor, so enabling and disabling never
//!   touch the system's own pf rules.
//! - Disabling flushes only that anchor. pf itself stays enabled.
//! - IPv6 is blocked outright.
//! - An exclusive split-tunnel policy adds pass rules for its addresses.

use crate::command::{args, run_privileged, CommandError, CommandRunner};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// pf anchor holding the kill switch rules
pub const ANCHOR: &str = "com.veil.killswitch";

const PFCTL: &str = "/sbin/pfctl";

/// What the firewall must still let through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchPolicy {
    /// Resolved tunnel server address
    pub server_ip: String,
    pub server_port: u16,
    /// Addresses or CIDRs that bypass the tunnel
    pub bypass: Vec<String>,
}

/// Kill switch errors
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("loading kill switch rules: {0}")]
    Enable(#[source] CommandError),

    #[error("flushing kill switch rules: {0} (manual recovery: sudo pfctl -a com.veil.killswitch -F all)")]
    Disable(#[source] CommandError),
}

/// Host firewall used as a kill switch
#[async_trait]
pub trait FirewallController: Send + Sync {
    /// Load the default-deny rules
    async fn enable(&self, policy: &KillSwitchPolicy) -> Result<(), FirewallError>;

    /// Remove the rules again
    async fn disable(&self) -> Result<(), FirewallError>;

    /// Whether rules are currently loaded
    async fn is_active(&self) -> bool;
}

/// macOS pf implementation
pub struct PfFirewall {
    runner: Arc<dyn CommandRunner>,
}

impl PfFirewall {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl FirewallController for PfFirewall {
    async fn enable(&self, policy: &KillSwitchPolicy) -> Result<(), FirewallError> {
        let rules = generate_rules(policy);
        // Shipped as base64 so the rule text survives osascript quoting
        let encoded = STANDARD.encode(rules);
        let command = format!(
            "echo {} | base64 -d | {} -a {} -f - && {} -E",
            encoded, PFCTL, ANCHOR, PFCTL
        );

        run_privileged(self.runner.as_ref(), &command)
            .await
            .map_err(FirewallError::Enable)?;

        info!(
            "Kill switch enabled (server {}:{}, {} bypass entries)",
            policy.server_ip,
            policy.server_port,
            policy.bypass.len()
        );
        Ok(())
    }

    async fn disable(&self) -> Result<(), FirewallError> {
        let command = format!("{} -a {} -F all", PFCTL, ANCHOR);
        if let Err(e) = run_privileged(self.runner.as_ref(), &command).await {
            warn!("Failed to flush kill switch rules: {}", e);
            return Err(FirewallError::Disable(e));
        }

        info!("Kill switch disabled");
        Ok(())
    }

    async fn is_active(&self) -> bool {
        let query = format!("{} -a {} -sr 2>/dev/null", PFCTL, ANCHOR);
        match self.runner.run("sh", &args(["-c", query.as_str()])).await {
            Ok(output) => !output.trim().is_empty(),
            Err(_) => false,
        }
    }
}

/// Render the pf anchor rules for a policy
pub fn generate_rules(policy: &KillSwitchPolicy) -> String {
    let mut rules = format!(
        "# Veil kill switch\n\
         # Anchor: {ANCHOR}\n\
         \n\
         set block-policy drop\n\
         \n\
         # Loopback carries the local SOCKS/HTTP listeners\n\
         pass quick on lo0 all\n\
         \n\
         # Tunnel server\n\
         pass out quick proto {{tcp, udp}} from any to {} port {}\n\
         \n\
         # DHCP\n\
         pass quick proto {{tcp, udp}} from any port 67:68 to any port 67:68\n\
         \n\
         # DNS\n\
         pass out quick proto {{tcp, udp}} from any to any port 53\n",
        policy.server_ip, policy.server_port
    );

    if !policy.bypass.is_empty() {
        rules.push_str("\n# Split tunnel bypass\n");
        for addr in &policy.bypass {
            rules.push_str(&format!("pass out quick from any to {}\n", addr));
        }
    }

    rules.push_str(
        "\n\
         # Everything else\n\
         block out all\n\
         block in all\n\
         block out inet6 all\n\
         block in inet6 all\n",
    );
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::RecordingRunner;

    fn policy(bypass: &[&str]) -> KillSwitchPolicy {
        KillSwitchPolicy {
            server_ip: "203.0.113.7".into(),
            server_port: 443,
            bypass: bypass.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_rule_order() {
        let rules = generate_rules(&policy(&[]));
        let pos = |needle: &str| rules.find(needle).unwrap_or_else(|| panic!("missing {}", needle));

        assert!(pos("set block-policy drop") < pos("pass quick on lo0 all"));
        assert!(pos("pass quick on lo0 all") < pos("to 203.0.113.7 port 443"));
        assert!(pos("port 67:68") < pos("port 53"));
        assert!(pos("port 53") < pos("block out all"));
        assert!(pos("block in all") < pos("block out inet6 all"));
        assert!(rules.contains("pass out quick proto {tcp, udp} from any to 203.0.113.7 port 443"));
        assert!(!rules.contains("bypass"));
    }

    #[test]
    fn test_bypass_rules_precede_block() {
        let rules = generate_rules(&policy(&["10.0.0.0/8", "93.184.216.34"]));

        let bypass = rules.find("pass out quick from any to 10.0.0.0/8").unwrap();
        let second = rules.find("pass out quick from any to 93.184.216.34").unwrap();
        let block = rules.find("block out all").unwrap();
        assert!(bypass < second && second < block);
    }

    #[tokio::test]
    async fn test_enable_loads_anchor() {
        let runner = Arc::new(RecordingRunner::new());
        let firewall = PfFirewall::new(runner.clone());
        firewall.enable(&policy(&[])).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let script = &calls[0][2];
        assert!(script.contains("base64 -d | /sbin/pfctl -a com.veil.killswitch -f -"));
        assert!(script.contains("&& /sbin/pfctl -E"));

        // The encoded payload is the generated rule text
        let encoded = script.split_whitespace().nth(4).unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, generate_rules(&policy(&[])));
    }

    #[tokio::test]
    async fn test_disable_flushes_anchor_only() {
        let runner = Arc::new(RecordingRunner::new());
        let firewall = PfFirewall::new(runner.clone());
        firewall.disable().await.unwrap();

        let script = &runner.calls()[0][2];
        assert!(script.contains("/sbin/pfctl -a com.veil.killswitch -F all"));
        assert!(!script.contains("pfctl -d"));
    }

    #[tokio::test]
    async fn test_disable_failure_reports_manual_command() {
        let runner = Arc::new(RecordingRunner::new().failing("osascript").failing("id"));
        let firewall = PfFirewall::new(runner);

        let err = firewall.disable().await.unwrap_err();
        assert!(err.to_string().contains("sudo pfctl -a com.veil.killswitch -F all"));
    }

    #[tokio::test]
    async fn test_is_active_reads_anchor() {
        let loaded = PfFirewall::new(Arc::new(
            RecordingRunner::new().with_output("sh", "block drop out all\n"),
        ));
        let empty = PfFirewall::new(Arc::new(RecordingRunner::new()));

        assert!(loaded.is_active().await);
        assert!(!empty.is_active().await);
    }
}
