//! `vless://` links

use crate::descriptor::{Protocol, ServerDescriptor};
use crate::parse::{LinkParts, ParseError};

pub(crate) fn parse(uri: &str) -> Result<ServerDescriptor, ParseError> {
    let link = LinkParts::new(uri, "VLESS")?;

    let uuid = link.username();
    if uuid.is_empty() {
        return Err(link.missing("UUID"));
    }
    let host = link.require_host()?;
    let port = link.require_port()?;

    let mut server = ServerDescriptor::new(Protocol::Vless, host, port);
    server.name = link.name(port);
    server.uuid = uuid;
    server.encryption = link.query("encryption");
    server.flow = link.query("flow");
    server.network = link.query_or("type", "tcp");
    server.tls = link.query_or("security", "none");
    server.sni = link.query("sni");
    server.fingerprint = link.query("fp");
    server.public_key = link.query("pbk");
    server.short_id = link.query("sid");
    server.spider_x = link.query("spx");
    server.path = link.query("path");
    server.host = link.query("host");
    server.service_name = link.query("serviceName");
    server.alpn = link.query("alpn");
    server.allow_insecure = matches!(link.query("allowInsecure").as_str(), "1" | "true");
    server.raw_uri = uri.to_string();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use crate::{parse_uri, ParseError, Protocol};

    #[test]
    fn test_reality_link() {
        let uri = "vless://b831381d-6324-4d53-ad4f-8cda48b30811@example.com:443\
                   ?encryption=none&flow=xtls-rprx-vision&type=tcp&security=reality\
                   &sni=www.microsoft.com&fp=chrome&pbk=SbVKOEMjK0sIlbwg4akyBg5mL5KZwwB-ed4eEE7YnRc\
                   &sid=6ba85179e30d4fc2&spx=%2F#My%20Server";
        let server = parse_uri(uri).unwrap();

        assert_eq!(server.protocol, Protocol::Vless);
        assert_eq!(server.name, "My Server");
        assert_eq!(server.address, "example.com");
        assert_eq!(server.port, 443);
        assert_eq!(server.uuid, "b831381d-6324-4d53-ad4f-8cda48b30811");
        assert_eq!(server.encryption, "none");
        assert_eq!(server.flow, "xtls-rprx-vision");
        assert_eq!(server.network, "tcp");
        assert_eq!(server.tls, "reality");
        assert_eq!(server.sni, "www.microsoft.com");
        assert_eq!(server.fingerprint, "chrome");
        assert_eq!(server.public_key, "SbVKOEMjK0sIlbwg4akyBg5mL5KZwwB-ed4eEE7YnRc");
        assert_eq!(server.short_id, "6ba85179e30d4fc2");
        assert_eq!(server.spider_x, "/");
        assert!(server.password.is_empty());
    }

    #[test]
    fn test_ws_tls_link() {
        let uri = "vless://uuid-1@1.2.3.4:8443?type=ws&security=tls&path=%2Fws&host=cdn.example.com\
                   &sni=cdn.example.com&alpn=h2%2Chttp%2F1.1&allowInsecure=1";
        let server = parse_uri(uri).unwrap();

        assert_eq!(server.address, "1.2.3.4");
        assert_eq!(server.network, "ws");
        assert_eq!(server.path, "/ws");
        assert_eq!(server.host, "cdn.example.com");
        assert_eq!(server.alpn, "h2,http/1.1");
        assert!(server.allow_insecure);
        assert_eq!(server.name, "1.2.3.4:8443");
    }

    #[test]
    fn test_defaults() {
        let server = parse_uri("vless://uuid@example.com:443").unwrap();
        assert_eq!(server.network, "tcp");
        assert_eq!(server.tls, "none");
        assert!(!server.allow_insecure);
    }

    #[test]
    fn test_ipv6_host() {
        let server = parse_uri("vless://uuid@[2001:db8::1]:443").unwrap();
        assert_eq!(server.address, "2001:db8::1");
        assert_eq!(server.name, "2001:db8::1:443");
    }

    #[test]
    fn test_missing_parts() {
        assert!(matches!(
            parse_uri("vless://@example.com:443"),
            Err(ParseError::MissingField { field: "UUID", .. })
        ));
        assert!(matches!(
            parse_uri("vless://uuid@example.com"),
            Err(ParseError::MissingField { field: "port", .. })
        ));
        assert!(matches!(
            parse_uri("vless://uuid@example.com:0"),
            Err(ParseError::InvalidPort { .. })
        ));
        assert!(parse_uri("vless://uuid@example.com:99999").is_err());
    }

    #[test]
    fn test_reparse_is_stable() {
        let uri = "vless://uuid@example.com:443?type=grpc&serviceName=svc&security=tls#grpc";
        let first = parse_uri(uri).unwrap();
        let second = parse_uri(&first.raw_uri).unwrap();
        assert_eq!(first.without_bookkeeping(), second.without_bookkeeping());
    }
}
