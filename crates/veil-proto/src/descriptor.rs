//! Server Descriptor
//!
//! The canonical record for one remote proxy endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy protocol spoken by a server
///
/// Serialized as its lowercase name. Names this build does not know are
/// kept as [`Protocol::Unknown`] so a store written by a newer client
/// still loads; the compiler rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
    Unknown(String),
}

impl Protocol {
    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Vmess => "vmess",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Unknown(name) => name,
        }
    }
}

impl From<String> for Protocol {
    fn from(name: String) -> Self {
        match name.as_str() {
            "vless" => Protocol::Vless,
            "vmess" => Protocol::Vmess,
            "trojan" => Protocol::Trojan,
            "shadowsocks" => Protocol::Shadowsocks,
            _ => Protocol::Unknown(name),
        }
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        protocol.as_str().to_string()
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed proxy server
///
/// Empty strings mean "not set". Only the credential fields of the
/// server's own protocol are populated:
/// - VLESS: `uuid`, `encryption`
/// - VMess: `uuid`, `alter_id`, `security`
/// - Trojan: `password`
/// - Shadowsocks: `method`, `password`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    // Identity
    pub id: String,
    pub name: String,
    pub protocol: Protocol,

    // Connection
    pub address: String,
    pub port: u16,

    // Credentials
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub alter_id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encryption: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub security: String,

    // Transport
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    /// VMess header obfuscation type
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub header_type: String,

    // Transport security
    /// `none`, `tls`, `reality`, or empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sni: String,
    /// Comma-separated ALPN list
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alpn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_insecure: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spider_x: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flow: String,

    // Bookkeeping
    /// Subscription URL this server was imported from (`None` = manual)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_source: Option<String>,
    /// Last measured round trip; `-1` marks an unreachable server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_uri: String,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl ServerDescriptor {
    /// Create a descriptor with a fresh id and only the endpoint filled in
    pub fn new(protocol: Protocol, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            id: new_id(),
            name: format!("{}:{}", address, port),
            protocol,
            address,
            port,
            uuid: String::new(),
            password: String::new(),
            alter_id: 0,
            encryption: String::new(),
            method: String::new(),
            security: String::new(),
            network: String::new(),
            path: String::new(),
            host: String::new(),
            service_name: String::new(),
            header_type: String::new(),
            tls: String::new(),
            sni: String::new(),
            alpn: String::new(),
            fingerprint: String::new(),
            allow_insecure: false,
            public_key: String::new(),
            short_id: String::new(),
            spider_x: String::new(),
            flow: String::new(),
            subscription_source: None,
            latency_ms: None,
            last_connected: None,
            added_at: Utc::now(),
            raw_uri: String::new(),
        }
    }

    /// `host:port` form of the endpoint
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Whether this server was imported from a subscription
    pub fn is_subscribed(&self) -> bool {
        self.subscription_source.is_some()
    }

    /// Copy with id, timestamps and probe results cleared
    ///
    /// Two parses of the same link compare equal under this view.
    pub fn without_bookkeeping(&self) -> Self {
        let mut copy = self.clone();
        copy.id.clear();
        copy.added_at = DateTime::<Utc>::default();
        copy.last_connected = None;
        copy.latency_ms = None;
        copy
    }
}

/// Generate a random UUID v4 string
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
