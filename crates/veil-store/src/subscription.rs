//! Subscriptions
//!
//! A subscription URL serves a base64 blob that decodes to one share link
//! per line. Refreshing replaces every server previously imported from
//! the same URL.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use veil_proto::{decode_base64, parse_uri, Base64Error, ServerDescriptor};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Subscription errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("empty subscription body")]
    EmptyBody,

    #[error("decoding subscription body: {0}")]
    Decode(#[from] Base64Error),

    #[error("fetching subscription: {0}")]
    Http(#[from] reqwest::Error),

    #[error("subscription returned HTTP {0}")]
    Status(u16),

    #[error("subscription contained no valid server URIs")]
    NoServers,
}

/// Decode a subscription body into newline-separated share links
pub fn decode_subscription(body: &[u8]) -> Result<String, SubscriptionError> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Err(SubscriptionError::EmptyBody);
    }

    let decoded = decode_base64(text)?;
    let decoded = String::from_utf8_lossy(&decoded);
    Ok(decoded.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Parse a raw body, tagging every server with `source`
///
/// Lines that do not parse are skipped.
pub fn parse_subscription(
    body: &[u8],
    source: &str,
) -> Result<Vec<ServerDescriptor>, SubscriptionError> {
    let decoded = decode_subscription(body)?;

    let mut servers = Vec::new();
    for line in decoded.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_uri(line) {
            Ok(mut server) => {
                server.subscription_source = Some(source.to_string());
                servers.push(server);
            }
            Err(e) => debug!("Skipping subscription line: {}", e),
        }
    }

    if servers.is_empty() {
        return Err(SubscriptionError::NoServers);
    }
    Ok(servers)
}

/// Download and parse a subscription
pub async fn fetch(url: &str) -> Result<Vec<ServerDescriptor>, SubscriptionError> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(concat!("veil/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(SubscriptionError::Status(status.as_u16()));
    }

    let body = response.bytes().await?;
    if body.is_empty() {
        return Err(SubscriptionError::EmptyBody);
    }

    let servers = parse_subscription(&body, url)?;
    info!("Subscription {} listed {} servers", url, servers.len());
    Ok(servers)
}
