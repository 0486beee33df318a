//! `ss://` links
//!
//! Two user-info layouts are accepted:
//! - SIP002: `base64(method:password)`
//! - plaintext `method:password`, percent-encoded (AEAD-2022 links)

use crate::descriptor::{Protocol, ServerDescriptor};
use crate::encoding::decode_base64;
use crate::parse::{decode, LinkParts, ParseError};

pub(crate) fn parse(uri: &str) -> Result<ServerDescriptor, ParseError> {
    let link = LinkParts::new(uri, "Shadowsocks")?;

    let host = link.require_host()?;
    let port = link.require_port()?;

    let plaintext = link.raw_userinfo().and_then(|userinfo| userinfo.split_once(':'));
    let (method, password) = match plaintext {
        Some((method, password)) => (decode(method), decode(password)),
        None => {
            let encoded = decode(link.raw_username());
            let decoded = decode_base64(&encoded).map_err(|source| ParseError::Base64 {
                protocol: "Shadowsocks",
                what: "userinfo",
                source,
            })?;
            let text = String::from_utf8_lossy(&decoded);
            let (method, password) = text
                .split_once(':')
                .ok_or(ParseError::MalformedUserInfo)?;
            (method.to_string(), password.to_string())
        }
    };

    let mut server = ServerDescriptor::new(Protocol::Shadowsocks, host, port);
    server.name = link.name(port);
    server.method = method;
    server.password = password;
    server.raw_uri = uri.to_string();

    Ok(server)
}
