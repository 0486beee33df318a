//! `vmess://` links
//!
//! The payload is base64 of a JSON object in the v2rayN share format.
//! Numeric fields show up both as numbers and as strings in the wild.

use crate::descriptor::{Protocol, ServerDescriptor};
use crate::encoding::{decode_base64, flex_int};
use crate::parse::{or_default, ParseError};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmessPayload {
    ps: String,
    add: String,
    #[serde(deserialize_with = "flex_int")]
    port: u64,
    id: String,
    #[serde(deserialize_with = "flex_int")]
    aid: u64,
    net: String,
    #[serde(rename = "type")]
    header_type: String,
    host: String,
    path: String,
    tls: String,
    sni: String,
    alpn: String,
    fp: String,
}

pub(crate) fn parse(uri: &str) -> Result<ServerDescriptor, ParseError> {
    let encoded = uri.strip_prefix("vmess://").unwrap_or(uri);
    let data = decode_base64(encoded).map_err(|source| ParseError::Base64 {
        protocol: "VMess",
        what: "base64",
        source,
    })?;

    let payload: VmessPayload = serde_json::from_slice(&data)?;

    if payload.add.is_empty() {
        return Err(ParseError::MissingField {
            protocol: "VMess",
            field: "server address",
        });
    }
    let port = match u16::try_from(payload.port) {
        Ok(0) => {
            return Err(ParseError::MissingField {
                protocol: "VMess",
                field: "port",
            })
        }
        Ok(port) => port,
        Err(_) => {
            return Err(ParseError::InvalidPort {
                protocol: "VMess",
                port: payload.port.to_string(),
            })
        }
    };

    let mut server = ServerDescriptor::new(Protocol::Vmess, payload.add, port);
    if !payload.ps.is_empty() {
        server.name = payload.ps;
    }
    server.uuid = payload.id;
    server.alter_id = u32::try_from(payload.aid).unwrap_or(u32::MAX);
    server.security = "auto".into();
    server.network = or_default(payload.net, "tcp");
    server.header_type = payload.header_type;
    server.host = payload.host;
    server.path = payload.path;
    server.tls = payload.tls;
    server.sni = payload.sni;
    server.alpn = payload.alpn;
    server.fingerprint = payload.fp;
    server.raw_uri = uri.to_string();

    Ok(server)
}
