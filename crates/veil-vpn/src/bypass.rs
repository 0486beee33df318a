//! Kill-switch exceptions derived from the split-tunnel policy.

use crate::resolver::HostResolver;
use tracing::{debug, warn};
use veil_route::{RuleKind, SplitTunnelPolicy};

/// Addresses the firewall must let through for an exclusive policy
///
/// Addresses and CIDRs pass through unchanged. Domain rules are
/// resolved now, best effort; an unresolvable domain is skipped.
/// Wildcard rules never produce exceptions.
pub async fn bypass_addresses(
    policy: Option<&SplitTunnelPolicy>,
    resolver: &dyn HostResolver,
) -> Vec<String> {
    let Some(policy) = policy else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for rule in policy.bypass_rules() {
        match rule.kind {
            RuleKind::Ip | RuleKind::Cidr => out.push(rule.value.clone()),
            RuleKind::Domain => match resolver.lookup(&rule.value).await {
                Ok(addrs) => {
                    debug!("Bypass {} -> {:?}", rule.value, addrs);
                    out.extend(addrs.into_iter().map(|a| a.to_string()));
                }
                Err(e) => warn!("Skipping bypass for {}: {}", rule.value, e),
            },
            RuleKind::Wildcard => {}
        }
    }
    out
}
