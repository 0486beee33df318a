//! Exit IP checks
//!
//! Asks an echo service which address a request arrives from, either
//! through the local SOCKS listener or directly.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use veil_route::LISTEN_ADDR;

/// Echo service returning the caller's address as plain text
pub const IP_ECHO_URL: &str = "https://icanhazip.com";

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("building HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("requesting exit IP: {0}")]
    Request(#[source] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("empty response")]
    Empty,
}

/// SOCKS proxy URL for a local listener port
///
/// `socks5h` so host names resolve on the far side of the tunnel.
pub fn socks_proxy_url(socks_port: u16) -> String {
    format!("socks5h://{}:{}", LISTEN_ADDR, socks_port)
}

/// Public address seen through the tunnel
pub async fn verify_exit_ip(socks_port: u16) -> Result<String, VerifyError> {
    let proxy = reqwest::Proxy::all(socks_proxy_url(socks_port)).map_err(VerifyError::Client)?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(VERIFY_TIMEOUT)
        .build()
        .map_err(VerifyError::Client)?;
    fetch_ip(&client).await
}

/// Public address seen without the tunnel
pub async fn direct_ip() -> Result<String, VerifyError> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(VERIFY_TIMEOUT)
        .build()
        .map_err(VerifyError::Client)?;
    fetch_ip(&client).await
}

async fn fetch_ip(client: &reqwest::Client) -> Result<String, VerifyError> {
    let response = client
        .get(IP_ECHO_URL)
        .send()
        .await
        .map_err(VerifyError::Request)?;

    let status = response.status();
    if !status.is_success() {
        return Err(VerifyError::Status(status));
    }

    let body = response.text().await.map_err(VerifyError::Request)?;
    let ip = body.trim();
    if ip.is_empty() {
        return Err(VerifyError::Empty);
    }
    debug!("Exit IP: {}", ip);
    Ok(ip.to_string())
}
