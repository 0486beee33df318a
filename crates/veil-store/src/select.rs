//! Server selection for `connect`

use thiserror::Error;
use veil_proto::ServerDescriptor;

/// Selection errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no servers available. Add one with: veil servers add <uri>")]
    NoServers,

    #[error("server {0:?} not found")]
    NotFound(String),
}

/// Pick the server to connect to
///
/// With a query: exact id, then the first name containing it (ignoring
/// case); no match is an error. Without one: the last used server, then
/// the lowest positive latency, then the first server.
pub fn select_server<'a>(
    servers: &'a [ServerDescriptor],
    query: Option<&str>,
    last_used: Option<&str>,
) -> Result<&'a ServerDescriptor, SelectError> {
    if servers.is_empty() {
        return Err(SelectError::NoServers);
    }

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        if let Some(server) = servers.iter().find(|s| s.id == query) {
            return Ok(server);
        }
        let needle = query.to_lowercase();
        return servers
            .iter()
            .find(|s| s.name.to_lowercase().contains(&needle))
            .ok_or_else(|| SelectError::NotFound(query.to_string()));
    }

    if let Some(id) = last_used.filter(|id| !id.is_empty()) {
        if let Some(server) = servers.iter().find(|s| s.id == id) {
            return Ok(server);
        }
    }

    let fastest = servers
        .iter()
        .filter(|s| s.latency_ms.is_some_and(|ms| ms > 0))
        .min_by_key(|s| s.latency_ms);

    Ok(fastest.unwrap_or(&servers[0]))
}
