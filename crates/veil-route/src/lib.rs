//! Veil Route - Split Tunneling and Engine Config
//!
//! Classifies split-tunnel rules and compiles a server plus an optional
//! policy into the JSON configuration the tunnel engine runs.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = veil_proto::parse_uri(link)?;
//! let mut policy = SplitTunnelPolicy::default();
//! policy.enabled = true;
//! policy.add_rule("10.0.0.0/8")?;
//!
//! let config = compile(&server, &CompileOptions {
//!     split_tunnel: Some(policy),
//!     ..Default::default()
//! })?;
//! std::fs::write("engine.json", config.to_json_pretty()?)?;
//! ```

mod compiler;
mod policy;
mod rule;
mod wire;

pub use compiler::{
    compile, stream_settings, CompileError, CompileOptions, LISTEN_ADDR, PRIVATE_RANGES,
};
pub use policy::{
    to_routing_rules, PolicyError, RoutingRule, SplitMode, SplitTunnelPolicy, DIRECT_TAG,
    PROXY_TAG,
};
pub use rule::{has_domain_rules, is_valid_domain, parse_rule, RuleError, RuleKind, SplitTunnelRule};
pub use wire::{
    CompiledTunnelConfig, GrpcSettings, HttpUpgradeSettings, Inbound, LogConfig, Outbound,
    OutboundSettings, RealitySettings, RoutingConfig, ServerEntry, Sniffing, SocksSettings,
    StreamSettings, TlsSettings, VnextEntry, VnextUser, WsSettings,
};
