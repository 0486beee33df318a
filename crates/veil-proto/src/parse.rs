//! Scheme dispatch and the URL plumbing shared by the link parsers.

use crate::descriptor::ServerDescriptor;
use crate::encoding::Base64Error;
use crate::{shadowsocks, trojan, vless, vmess};
use percent_encoding::percent_decode_str;
use url::{Host, Url};

/// Share-link parse errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty URI")]
    Empty,

    #[error("unsupported protocol scheme in URI: {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid {protocol} URI: {source}")]
    InvalidUri {
        protocol: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{protocol} URI missing {field}")]
    MissingField {
        protocol: &'static str,
        field: &'static str,
    },

    #[error("{protocol} URI invalid port {port:?}")]
    InvalidPort {
        protocol: &'static str,
        port: String,
    },

    #[error("{protocol} URI {what} decode failed: {source}")]
    Base64 {
        protocol: &'static str,
        what: &'static str,
        #[source]
        source: Base64Error,
    },

    #[error("VMess URI JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shadowsocks URI: decoded userinfo missing method:password")]
    MalformedUserInfo,
}

/// Parse a share link into a server descriptor
///
/// The input is trimmed first; the trimmed text is kept as `raw_uri`.
pub fn parse_uri(uri: &str) -> Result<ServerDescriptor, ParseError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(ParseError::Empty);
    }

    if uri.starts_with("vless://") {
        vless::parse(uri)
    } else if uri.starts_with("vmess://") {
        vmess::parse(uri)
    } else if uri.starts_with("trojan://") {
        trojan::parse(uri)
    } else if uri.starts_with("ss://") {
        shadowsocks::parse(uri)
    } else {
        Err(ParseError::UnsupportedScheme(uri.to_string()))
    }
}

/// A share link split into its URL parts, all percent-decoded
pub(crate) struct LinkParts {
    url: Url,
    pub protocol: &'static str,
    pub host: String,
    /// User-info exactly as written; `Url` drops an empty password
    userinfo: Option<String>,
}

impl LinkParts {
    pub fn new(uri: &str, protocol: &'static str) -> Result<Self, ParseError> {
        let url = Url::parse(uri).map_err(|source| ParseError::InvalidUri { protocol, source })?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => decode(domain),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => String::new(),
        };

        Ok(Self {
            url,
            protocol,
            host,
            userinfo: raw_userinfo(uri).map(str::to_string),
        })
    }

    /// Host, or a missing-field error
    pub fn require_host(&self) -> Result<String, ParseError> {
        if self.host.is_empty() {
            return Err(self.missing("host"));
        }
        Ok(self.host.clone())
    }

    /// Explicit port, rejecting zero
    pub fn port(&self) -> Result<Option<u16>, ParseError> {
        match self.url.port() {
            Some(0) => Err(ParseError::InvalidPort {
                protocol: self.protocol,
                port: "0".into(),
            }),
            port => Ok(port),
        }
    }

    pub fn require_port(&self) -> Result<u16, ParseError> {
        self.port()?.ok_or_else(|| self.missing("port"))
    }

    pub fn username(&self) -> String {
        decode(self.url.username())
    }

    /// Raw (still percent-encoded) user name
    pub fn raw_username(&self) -> &str {
        self.url.username()
    }

    /// Raw user-info including any `:password` part
    pub fn raw_userinfo(&self) -> Option<&str> {
        self.userinfo.as_deref()
    }

    /// First value of a query key, or empty
    pub fn query(&self, key: &str) -> String {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    /// Query value with a fallback for absent or empty keys
    pub fn query_or(&self, key: &str, fallback: &str) -> String {
        or_default(self.query(key), fallback)
    }

    /// Display name from the fragment, else `host:port`
    pub fn name(&self, port: u16) -> String {
        match self.url.fragment().map(decode) {
            Some(name) if !name.is_empty() => name,
            _ => format!("{}:{}", self.host, port),
        }
    }

    pub fn missing(&self, field: &'static str) -> ParseError {
        ParseError::MissingField {
            protocol: self.protocol,
            field,
        }
    }
}

fn raw_userinfo(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    authority.rsplit_once('@').map(|(userinfo, _)| userinfo)
}

pub(crate) fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

pub(crate) fn or_default(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
