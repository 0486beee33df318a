//! Split-Tunnel Rules
//!
//! Classifies user input into one of four rule kinds:
//! - IP: `1.2.3.4`, `2001:db8::1`
//! - CIDR: `10.0.0.0/8`, `fd00::/8`
//! - Wildcard: `*.example.com` (the domain and all subdomains)
//! - Domain: `example.com`

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

/// Errors from classifying a rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("empty rule input")]
    Empty,

    #[error("invalid wildcard domain: {0}")]
    InvalidWildcard(String),

    #[error("invalid rule: {0} (expected IP, CIDR, domain, or *.domain)")]
    Invalid(String),
}

/// Kind of split-tunnel rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Ip,
    Cidr,
    Domain,
    Wildcard,
}

impl RuleKind {
    /// Matches on host names rather than addresses
    pub fn is_domain(&self) -> bool {
        matches!(self, RuleKind::Domain | RuleKind::Wildcard)
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleKind::Ip => "ip",
            RuleKind::Cidr => "cidr",
            RuleKind::Domain => "domain",
            RuleKind::Wildcard => "wildcard",
        };
        f.write_str(name)
    }
}

/// A classified split-tunnel entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitTunnelRule {
    /// Trimmed user input
    pub value: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
}

impl SplitTunnelRule {
    /// Domain a wildcard rule covers (`*.example.com` -> `example.com`)
    pub fn base_domain(&self) -> &str {
        self.value.strip_prefix("*.").unwrap_or(&self.value)
    }
}

impl std::str::FromStr for SplitTunnelRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rule(s)
    }
}

/// Classify and validate a rule
///
/// Tried in order: IP literal, CIDR, `*.` wildcard, plain domain.
pub fn parse_rule(input: &str) -> Result<SplitTunnelRule, RuleError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RuleError::Empty);
    }

    let rule = |kind| SplitTunnelRule {
        value: input.to_string(),
        kind,
    };

    if input.parse::<IpAddr>().is_ok() {
        return Ok(rule(RuleKind::Ip));
    }

    if is_cidr(input) {
        return Ok(rule(RuleKind::Cidr));
    }

    if let Some(domain) = input.strip_prefix("*.") {
        if is_valid_domain(domain) {
            return Ok(rule(RuleKind::Wildcard));
        }
        return Err(RuleError::InvalidWildcard(input.to_string()));
    }

    if is_valid_domain(input) {
        return Ok(rule(RuleKind::Domain));
    }

    Err(RuleError::Invalid(input.to_string()))
}

/// Whether any rule matches on host names
pub fn has_domain_rules(rules: &[SplitTunnelRule]) -> bool {
    rules.iter().any(|r| r.kind.is_domain())
}

/// `addr/prefix` with a prefix length that fits the address family
fn is_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };

    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => prefix <= 32,
        Ok(IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}

/// At least one dot, no empty labels, labels of ASCII alphanumerics and `-`
pub fn is_valid_domain(s: &str) -> bool {
    if !s.contains('.') || s.starts_with('.') || s.ends_with('.') {
        return false;
    }

    s.split('.').all(|label| {
        !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
