//! Latency Probing
//!
//! TCP connect time to each server, measured concurrently. A probe that
//! fails or exceeds its timeout reports [`UNREACHABLE`].

use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use veil_proto::ServerDescriptor;

/// Per-probe connect timeout
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Latency reported for a server that could not be reached
pub const UNREACHABLE: i64 = -1;

/// Result of probing one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub server_id: String,
    /// Milliseconds, or [`UNREACHABLE`]
    pub latency_ms: i64,
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        self.latency_ms >= 0
    }
}

/// Time a TCP connect to `address:port`
pub async fn probe(address: &str, port: u16, timeout: Duration) -> i64 {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(_stream)) => start.elapsed().as_millis() as i64,
        Ok(Err(e)) => {
            debug!("Probe {}:{} failed: {}", address, port, e);
            UNREACHABLE
        }
        Err(_) => {
            debug!("Probe {}:{} timed out", address, port);
            UNREACHABLE
        }
    }
}

/// Probe every server concurrently and wait for all of them
///
/// Results arrive in completion order, one per server. A probe task that
/// panics or is cancelled counts as [`UNREACHABLE`].
pub async fn probe_all(servers: &[ServerDescriptor], timeout: Duration) -> Vec<ProbeResult> {
    let mut tasks = JoinSet::new();
    for server in servers {
        let id = server.id.clone();
        let address = server.address.clone();
        let port = server.port;
        tasks.spawn(async move {
            ProbeResult {
                server_id: id,
                latency_ms: probe(&address, port, timeout).await,
            }
        });
    }

    let mut results = Vec::with_capacity(servers.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!("Probe task failed: {}", e),
        }
    }
    fill_unreachable(servers, &mut results);
    results
}

/// Add an [`UNREACHABLE`] result for every server without one
fn fill_unreachable(servers: &[ServerDescriptor], results: &mut Vec<ProbeResult>) {
    for server in servers {
        if !results.iter().any(|r| r.server_id == server.id) {
            results.push(ProbeResult {
                server_id: server.id.clone(),
                latency_ms: UNREACHABLE,
            });
        }
    }
}
