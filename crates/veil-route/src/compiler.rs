//! Routing Rule Compiler
//!
//! Builds the engine configuration for one server and an optional
//! split-tunnel policy.
//!
//! # Rule Order
//!
//! ```text
//! 1. user domain rule     (direct | proxy, per mode)
//! 2. user address rule    (direct | proxy, per mode)
//! 3. private ranges       -> direct, always last
//! ```
//!
//! The first outbound is the engine's default for unmatched traffic:
//! `proxy` normally, `direct` for an inclusive policy.

use crate::policy::{SplitTunnelPolicy, DIRECT_TAG, PROXY_TAG};
use crate::wire::{
    CompiledTunnelConfig, GrpcSettings, HttpUpgradeSettings, Inbound, LogConfig, Outbound,
    OutboundSettings, RealitySettings, RoutingConfig, ServerEntry, Sniffing, SocksSettings,
    StreamSettings, TlsSettings, VnextEntry, VnextUser, WsSettings,
};
use crate::RoutingRule;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;
use veil_proto::{Protocol, ServerDescriptor};

/// Loopback address the local listeners bind to
pub const LISTEN_ADDR: &str = "127.0.0.1";

/// Private, loopback and link-local ranges that never enter the tunnel
pub const PRIVATE_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "100.64.0.0/10",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// Compiler errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

/// Inputs besides the server itself
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub socks_port: u16,
    pub http_port: u16,
    /// `None` compiles the plain full-tunnel config
    pub split_tunnel: Option<SplitTunnelPolicy>,
    /// Access log destination; `None` disables it
    pub access_log: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            socks_port: 1080,
            http_port: 8080,
            split_tunnel: None,
            access_log: None,
        }
    }
}

/// Compile a server and options into an engine configuration
pub fn compile(
    server: &ServerDescriptor,
    options: &CompileOptions,
) -> Result<CompiledTunnelConfig, CompileError> {
    let proxy = build_outbound(server)?;
    let direct = Outbound {
        tag: DIRECT_TAG.into(),
        protocol: "freedom".into(),
        settings: None,
        stream_settings: None,
    };

    let policy = options.split_tunnel.as_ref();

    let outbounds = if policy.is_some_and(|p| p.is_inclusive()) {
        vec![direct, proxy]
    } else {
        vec![proxy, direct]
    };

    let mut rules = policy.map(|p| p.routing_rules()).unwrap_or_default();
    let domain_strategy = if policy.is_some_and(|p| p.has_domain_rules()) {
        "IPIfNonMatch"
    } else {
        "AsIs"
    };
    rules.push(RoutingRule::ip(
        DIRECT_TAG,
        PRIVATE_RANGES.iter().map(|s| s.to_string()).collect(),
    ));

    debug!(
        "Compiled {} config for {} ({} routing rules, {})",
        server.protocol,
        server.endpoint(),
        rules.len(),
        domain_strategy
    );

    Ok(CompiledTunnelConfig {
        log: LogConfig {
            access: options.access_log.clone().unwrap_or_else(|| "none".into()),
            error: "none".into(),
            loglevel: "warning".into(),
        },
        inbounds: vec![
            Inbound {
                tag: "socks-in".into(),
                listen: LISTEN_ADDR.into(),
                port: options.socks_port,
                protocol: "socks".into(),
                settings: Some(SocksSettings { udp: true }),
                sniffing: Some(sniffing()),
            },
            Inbound {
                tag: "http-in".into(),
                listen: LISTEN_ADDR.into(),
                port: options.http_port,
                protocol: "http".into(),
                settings: None,
                sniffing: Some(sniffing()),
            },
        ],
        outbounds,
        routing: RoutingConfig {
            domain_strategy: domain_strategy.into(),
            rules,
        },
    })
}

fn sniffing() -> Sniffing {
    Sniffing {
        enabled: true,
        dest_override: vec!["http".into(), "tls".into()],
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Protocol outbound tagged `proxy`
fn build_outbound(server: &ServerDescriptor) -> Result<Outbound, CompileError> {
    let (settings, stream_settings) = match &server.protocol {
        Protocol::Vless => {
            let user = VnextUser::Vless {
                id: server.uuid.clone(),
                encryption: or_default(&server.encryption, "none"),
                flow: server.flow.clone(),
            };
            (vnext(server, user), Some(stream_settings(server)))
        }
        Protocol::Vmess => {
            let user = VnextUser::Vmess {
                id: server.uuid.clone(),
                alter_id: server.alter_id,
                security: or_default(&server.security, "auto"),
            };
            (vnext(server, user), Some(stream_settings(server)))
        }
        Protocol::Trojan => {
            let entry = ServerEntry {
                address: server.address.clone(),
                port: server.port,
                method: None,
                password: server.password.clone(),
            };
            (
                OutboundSettings::Servers { servers: vec![entry] },
                Some(stream_settings(server)),
            )
        }
        Protocol::Shadowsocks => {
            let entry = ServerEntry {
                address: server.address.clone(),
                port: server.port,
                method: Some(server.method.clone()),
                password: server.password.clone(),
            };
            // Plain shadowsocks carries no transport layer of its own
            let stream = (!server.network.is_empty() && server.network != "tcp")
                .then(|| stream_settings(server));
            (OutboundSettings::Servers { servers: vec![entry] }, stream)
        }
        Protocol::Unknown(name) => return Err(CompileError::UnsupportedProtocol(name.clone())),
    };

    Ok(Outbound {
        tag: PROXY_TAG.into(),
        protocol: server.protocol.as_str().into(),
        settings: Some(settings),
        stream_settings,
    })
}

fn vnext(server: &ServerDescriptor, user: VnextUser) -> OutboundSettings {
    OutboundSettings::Vnext {
        vnext: vec![VnextEntry {
            address: server.address.clone(),
            port: server.port,
            users: vec![user],
        }],
    }
}

/// Transport and security settings for a server
pub fn stream_settings(server: &ServerDescriptor) -> StreamSettings {
    let network = or_default(&server.network, "tcp");
    let security = or_default(&server.tls, "none");

    let mut stream = StreamSettings {
        network: network.clone(),
        security: security.clone(),
        ..Default::default()
    };

    match network.as_str() {
        "ws" => {
            let mut headers = BTreeMap::new();
            if !server.host.is_empty() {
                headers.insert("Host".to_string(), server.host.clone());
            }
            stream.ws_settings = Some(WsSettings {
                path: server.path.clone(),
                headers,
            });
        }
        "grpc" => {
            stream.grpc_settings = Some(GrpcSettings {
                service_name: server.service_name.clone(),
            });
        }
        "httpupgrade" => {
            stream.httpupgrade_settings = Some(HttpUpgradeSettings {
                path: server.path.clone(),
                host: server.host.clone(),
            });
        }
        _ => {}
    }

    match security.as_str() {
        "tls" => {
            stream.tls_settings = Some(TlsSettings {
                server_name: server.sni.clone(),
                fingerprint: server.fingerprint.clone(),
                alpn: split_alpn(&server.alpn),
                allow_insecure: server.allow_insecure,
            });
        }
        "reality" => {
            stream.reality_settings = Some(RealitySettings {
                server_name: server.sni.clone(),
                fingerprint: or_default(&server.fingerprint, "chrome"),
                public_key: server.public_key.clone(),
                short_id: server.short_id.clone(),
                spider_x: server.spider_x.clone(),
            });
        }
        _ => {}
    }

    stream
}

fn split_alpn(alpn: &str) -> Vec<String> {
    if alpn.is_empty() {
        return Vec::new();
    }
    alpn.split(',').map(str::to_string).collect()
}
