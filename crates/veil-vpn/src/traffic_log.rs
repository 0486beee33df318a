//! Traffic Log
//!
//! The engine appends one line per accepted connection to its access log:
//!
//! ```text
//! 2026/02/26 22:38:48.761671 from 127.0.0.1:58550 accepted //docs.google.com:443 [http-in >> proxy]
//! ```
//!
//! This module resets the file before a session and reads back the most
//! recent entries as destination and route pairs.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;
use veil_store::fsutil::write_atomic;

/// Entries kept by [`recent`] when no limit is given
pub const MAX_ENTRIES: usize = 200;

/// One accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// `HH:MM:SS`
    pub time: String,
    /// Destination host or address, without the port
    pub destination: String,
    /// Outbound tag, e.g. `proxy` or `direct`
    pub route: String,
}

/// Parse one access log line; anything else yields `None`
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let mut fields = line.split_whitespace();
    let _date = fields.next().filter(|d| d.len() == 10 && d.matches('/').count() == 2)?;
    let time = fields.next()?.split('.').next()?;
    if time.len() != 8 || time.matches(':').count() != 2 {
        return None;
    }
    if fields.next()? != "from" {
        return None;
    }
    let _source = fields.next()?;
    if fields.next()? != "accepted" {
        return None;
    }
    let destination = strip_port(fields.next()?)?;

    let rest: Vec<&str> = fields.collect();
    if !rest.iter().any(|f| *f == ">>" || *f == "->") {
        return None;
    }
    let route = rest.last()?.trim_end_matches(']');
    if route.is_empty() {
        return None;
    }

    Some(LogEntry {
        time: time.to_string(),
        destination: destination.to_string(),
        route: route.to_string(),
    })
}

/// `//host:port`, `tcp:host:port` or `[v6]:port` down to the host
fn strip_port(target: &str) -> Option<&str> {
    let target = target.trim_start_matches("//");
    let target = target
        .strip_prefix("tcp:")
        .or_else(|| target.strip_prefix("udp:"))
        .unwrap_or(target);
    let (host, port) = target.rsplit_once(':')?;
    if port.parse::<u16>().is_err() {
        return None;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (!host.is_empty()).then_some(host)
}

/// The last `limit` entries of the log at `path`, oldest first
///
/// A `limit` of zero means [`MAX_ENTRIES`]. A missing file has no entries.
pub fn recent(path: &Path, limit: usize) -> io::Result<Vec<LogEntry>> {
    let limit = if limit == 0 { MAX_ENTRIES } else { limit };
    let text = match fs::read(path) {
        Ok(data) => String::from_utf8_lossy(&data).into_owned(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let entries: Vec<LogEntry> = text.lines().filter_map(parse_line).collect();
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.into_iter().skip(skip).collect())
}

/// Start an empty, owner-only log for a new session
pub fn reset(path: &Path) -> io::Result<()> {
    write_atomic(path, b"")
}
