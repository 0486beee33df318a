//! Tunnel Engine Config (wire format)
//!
//! Serde structures for the JSON document the external tunnel engine
//! loads. Field names follow the engine's camelCase schema; unset
//! optional sections are omitted.

use crate::policy::RoutingRule;
use serde::Serialize;
use std::collections::BTreeMap;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledTunnelConfig {
    pub log: LogConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub routing: RoutingConfig,
}

impl CompiledTunnelConfig {
    /// Pretty-printed JSON for the engine
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Outbound with the given tag
    pub fn outbound(&self, tag: &str) -> Option<&Outbound> {
        self.outbounds.iter().find(|o| o.tag == tag)
    }

    /// Inbound with the given tag
    pub fn inbound(&self, tag: &str) -> Option<&Inbound> {
        self.inbounds.iter().find(|i| i.tag == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogConfig {
    pub access: String,
    pub error: String,
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sniffing {
    pub enabled: bool,
    #[serde(rename = "destOverride")]
    pub dest_override: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocksSettings {
    pub udp: bool,
}

/// Local listener
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inbound {
    pub tag: String,
    pub listen: String,
    pub port: u16,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SocksSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Sniffing>,
}

/// Egress route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<OutboundSettings>,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
}

/// Protocol-specific outbound settings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundSettings {
    /// VLESS and VMess
    Vnext { vnext: Vec<VnextEntry> },
    /// Trojan and Shadowsocks
    Servers { servers: Vec<ServerEntry> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VnextEntry {
    pub address: String,
    pub port: u16,
    pub users: Vec<VnextUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VnextUser {
    Vless {
        id: String,
        encryption: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        flow: String,
    },
    Vmess {
        id: String,
        #[serde(rename = "alterId")]
        alter_id: u32,
        security: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEntry {
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub password: String,
}

/// Transport and transport-security settings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,
    #[serde(rename = "httpupgradeSettings", skip_serializing_if = "Option::is_none")]
    pub httpupgrade_settings: Option<HttpUpgradeSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub allow_insecure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub public_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub short_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub spider_x: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WsSettings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpUpgradeSettings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingConfig {
    #[serde(rename = "domainStrategy")]
    pub domain_strategy: String,
    pub rules: Vec<RoutingRule>,
}
