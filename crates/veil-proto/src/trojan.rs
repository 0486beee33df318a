//! `trojan://` links

use crate::descriptor::{Protocol, ServerDescriptor};
use crate::parse::{LinkParts, ParseError};

/// Port assumed when a trojan link leaves it out
const DEFAULT_PORT: u16 = 443;

pub(crate) fn parse(uri: &str) -> Result<ServerDescriptor, ParseError> {
    let link = LinkParts::new(uri, "Trojan")?;

    let password = link.username();
    if password.is_empty() {
        return Err(link.missing("password"));
    }
    let host = link.require_host()?;
    let port = link.port()?.unwrap_or(DEFAULT_PORT);

    let mut server = ServerDescriptor::new(Protocol::Trojan, host, port);
    server.name = link.name(port);
    server.password = password;
    server.flow = link.query("flow");
    server.network = link.query_or("type", "tcp");
    server.tls = link.query_or("security", "tls");
    server.sni = link.query("sni");
    server.fingerprint = link.query("fp");
    server.path = link.query("path");
    server.host = link.query("host");
    server.service_name = link.query("serviceName");
    server.alpn = link.query("alpn");
    server.public_key = link.query("pbk");
    server.short_id = link.query("sid");
    server.spider_x = link.query("spx");
    server.raw_uri = uri.to_string();

    Ok(server)
}
