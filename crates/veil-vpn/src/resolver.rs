//! Host Resolution
//!
//! Resolves server and split-tunnel host names to addresses before the
//! kill switch pins traffic to them. Literal addresses skip the lookup.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// DNS resolution errors
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Resolution failed for {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    #[error("No addresses found for {0}")]
    NoAddresses(String),
}

/// Looks up the addresses of a host name
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;

    /// First address of `host`
    async fn lookup_one(&self, host: &str) -> Result<IpAddr, DnsError> {
        self.lookup(host)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DnsError::NoAddresses(host.to_string()))
    }
}

/// Resolver backed by the system DNS configuration
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Create from the system configuration, falling back to Cloudflare
    /// when it cannot be read
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                info!("System DNS config unavailable ({}), using Cloudflare", e);
                let mut opts = ResolverOpts::default();
                opts.timeout = Duration::from_secs(5);
                TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), opts)
            }
        };
        Self { resolver }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        debug!("DNS lookup for: {}", host);
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| DnsError::ResolutionFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let addresses: Vec<IpAddr> = lookup.iter().collect();
        if addresses.is_empty() {
            return Err(DnsError::NoAddresses(host.to_string()));
        }
        Ok(addresses)
    }
}
