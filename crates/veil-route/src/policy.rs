//! Split-Tunnel Policy
//!
//! An ordered rule list plus the mode that decides what the rules mean.
//!
//! # Modes
//!
//! - **Exclusive**: listed destinations bypass the tunnel, everything
//!   else goes through it.
//! - **Inclusive**: only listed destinations use the tunnel, everything
//!   else goes direct.

use crate::rule::{has_domain_rules, parse_rule, RuleError, RuleKind, SplitTunnelRule};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outbound tag of the tunnel
pub const PROXY_TAG: &str = "proxy";
/// Outbound tag of the direct route
pub const DIRECT_TAG: &str = "direct";

/// Policy editing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("rule {0:?} already exists")]
    Duplicate(String),

    #[error("rule {0:?} not found")]
    NotFound(String),

    #[error("invalid mode {0:?} (expected exclusive or inclusive)")]
    InvalidMode(String),
}

/// How listed destinations are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Listed destinations bypass the tunnel
    #[default]
    Exclusive,
    /// Only listed destinations use the tunnel
    Inclusive,
}

impl SplitMode {
    /// Outbound tag that matching traffic is sent to
    pub fn rule_tag(&self) -> &'static str {
        match self {
            SplitMode::Exclusive => DIRECT_TAG,
            SplitMode::Inclusive => PROXY_TAG,
        }
    }
}

impl std::fmt::Display for SplitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitMode::Exclusive => f.write_str("exclusive"),
            SplitMode::Inclusive => f.write_str("inclusive"),
        }
    }
}

impl std::str::FromStr for SplitMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exclusive" => Ok(SplitMode::Exclusive),
            "inclusive" => Ok(SplitMode::Inclusive),
            _ => Err(PolicyError::InvalidMode(s.to_string())),
        }
    }
}

/// A routing rule in the tunnel engine's wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(rename = "outboundTag")]
    pub outbound_tag: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
}

impl RoutingRule {
    /// Rule matching destination addresses
    pub fn ip(tag: &str, ip: Vec<String>) -> Self {
        Self {
            rule_type: "field".into(),
            outbound_tag: tag.into(),
            ip,
            domain: Vec::new(),
        }
    }

    /// Rule matching destination host names
    pub fn domain(tag: &str, domain: Vec<String>) -> Self {
        Self {
            rule_type: "field".into(),
            outbound_tag: tag.into(),
            ip: Vec::new(),
            domain,
        }
    }
}

/// Convert rules into at most two routing rules: one for host names,
/// then one for addresses, both tagged per `mode`
///
/// A domain rule matches the exact name and its subdomains; a wildcard
/// matches the base domain and its subdomains.
pub fn to_routing_rules(rules: &[SplitTunnelRule], mode: SplitMode) -> Vec<RoutingRule> {
    let mut domains = Vec::new();
    let mut ips = Vec::new();

    for rule in rules {
        match rule.kind {
            RuleKind::Ip | RuleKind::Cidr => ips.push(rule.value.clone()),
            RuleKind::Domain => {
                domains.push(format!("full:{}", rule.value));
                domains.push(format!("domain:{}", rule.value));
            }
            RuleKind::Wildcard => domains.push(format!("domain:{}", rule.base_domain())),
        }
    }

    let tag = mode.rule_tag();
    let mut out = Vec::with_capacity(2);
    if !domains.is_empty() {
        out.push(RoutingRule::domain(tag, domains));
    }
    if !ips.is_empty() {
        out.push(RoutingRule::ip(tag, ips));
    }
    out
}

/// Split-tunnel configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTunnelPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SplitMode,
    #[serde(default)]
    pub rules: Vec<SplitTunnelRule>,
}

impl SplitTunnelPolicy {
    /// Enabled policy with the given rules
    pub fn new(mode: SplitMode, rules: Vec<SplitTunnelRule>) -> Self {
        Self {
            enabled: true,
            mode,
            rules,
        }
    }

    /// Enabled and non-empty
    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }

    /// Enabled and in inclusive mode
    pub fn is_inclusive(&self) -> bool {
        self.enabled && self.mode == SplitMode::Inclusive
    }

    /// Active with at least one host-name rule
    pub fn has_domain_rules(&self) -> bool {
        self.is_active() && has_domain_rules(&self.rules)
    }

    /// Classify and append a rule, rejecting duplicates
    pub fn add_rule(&mut self, input: &str) -> Result<&SplitTunnelRule, PolicyError> {
        let rule = parse_rule(input)?;
        if self.rules.iter().any(|r| r.value == rule.value) {
            return Err(PolicyError::Duplicate(rule.value));
        }
        self.rules.push(rule);
        Ok(&self.rules[self.rules.len() - 1])
    }

    /// Remove a rule by value
    pub fn remove_rule(&mut self, value: &str) -> Result<SplitTunnelRule, PolicyError> {
        let value = value.trim();
        let pos = self
            .rules
            .iter()
            .position(|r| r.value == value)
            .ok_or_else(|| PolicyError::NotFound(value.to_string()))?;
        Ok(self.rules.remove(pos))
    }

    /// Drop every rule
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Routing rules this policy contributes (empty when inactive)
    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        if !self.is_active() {
            return Vec::new();
        }
        to_routing_rules(&self.rules, self.mode)
    }

    /// Rules whose destinations must stay reachable outside the tunnel
    ///
    /// Only an active exclusive policy sends traffic around the tunnel.
    /// Wildcards are left out: their host set cannot be enumerated.
    pub fn bypass_rules(&self) -> impl Iterator<Item = &SplitTunnelRule> {
        let exclusive = self.is_active() && self.mode == SplitMode::Exclusive;
        self.rules
            .iter()
            .filter(move |r| exclusive && r.kind != RuleKind::Wildcard)
    }
}
