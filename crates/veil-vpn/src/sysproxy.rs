//! System Proxy
//!
//! Points the OS-wide SOCKS, HTTP and HTTPS proxy settings of one
//! network service at the local listeners, and reverts them.

use crate::command::{args, CommandError, CommandRunner};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use veil_route::LISTEN_ADDR;

/// System proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("listing network services: {0}")]
    ListServices(#[source] CommandError),

    #[error("no active network service found")]
    NoService,

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Controls the OS-wide proxy settings
#[async_trait]
pub trait SystemProxyController: Send + Sync {
    /// Name of the network service to configure (e.g. `Wi-Fi`)
    async fn detect_service(&self) -> Result<String, ProxyError>;

    /// Route the service's SOCKS, HTTP and HTTPS traffic to the local listeners
    async fn enable(&self, service: &str, socks_port: u16, http_port: u16) -> Result<(), ProxyError>;

    /// Turn the three proxies off again
    async fn disable(&self, service: &str) -> Result<(), ProxyError>;
}

/// macOS `networksetup` implementation
pub struct NetworkSetupProxy {
    runner: Arc<dyn CommandRunner>,
}

impl NetworkSetupProxy {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn networksetup(&self, argv: Vec<String>) -> Result<(), ProxyError> {
        self.runner.run("networksetup", &argv).await?;
        Ok(())
    }
}

#[async_trait]
impl SystemProxyController for NetworkSetupProxy {
    async fn detect_service(&self) -> Result<String, ProxyError> {
        let output = self
            .runner
            .run("networksetup", &args(["-listallnetworkservices"]))
            .await
            .map_err(ProxyError::ListServices)?;
        pick_network_service(&output).ok_or(ProxyError::NoService)
    }

    async fn enable(&self, service: &str, socks_port: u16, http_port: u16) -> Result<(), ProxyError> {
        let socks = socks_port.to_string();
        let http = http_port.to_string();

        let commands = [
            args(["-setsocksfirewallproxy", service, LISTEN_ADDR, socks.as_str()]),
            args(["-setsocksfirewallproxystate", service, "on"]),
            args(["-setwebproxy", service, LISTEN_ADDR, http.as_str()]),
            args(["-setwebproxystate", service, "on"]),
            args(["-setsecurewebproxy", service, LISTEN_ADDR, http.as_str()]),
            args(["-setsecurewebproxystate", service, "on"]),
        ];
        for argv in commands {
            self.networksetup(argv).await?;
        }

        info!("System proxy set on {} (socks {}, http {})", service, socks_port, http_port);
        Ok(())
    }

    async fn disable(&self, service: &str) -> Result<(), ProxyError> {
        let commands = [
            args(["-setsocksfirewallproxystate", service, "off"]),
            args(["-setwebproxystate", service, "off"]),
            args(["-setsecurewebproxystate", service, "off"]),
        ];
        for argv in commands {
            self.networksetup(argv).await?;
        }

        info!("System proxy cleared on {}", service);
        Ok(())
    }
}

/// Choose a service from `networksetup -listallnetworkservices` output
///
/// Skips the header line, blank lines and disabled (`*`) services.
/// Prefers `Wi-Fi` or any Ethernet service, else the first one listed.
pub fn pick_network_service(output: &str) -> Option<String> {
    let services: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with("An asterisk") && !s.starts_with('*'))
        .collect();

    services
        .iter()
        .find(|s| **s == "Wi-Fi" || s.contains("Ethernet"))
        .or_else(|| services.first())
        .map(|s| s.to_string())
}
