//! Veil VPN - Tunnel Lifecycle and System Integration
//!
//! Runs the tunnel engine and wires the host into it: the OS-wide proxy
//! settings, a pf kill switch, and a recovery record for crashes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Session                           │
//! │                                                           │
//! │  ┌──────────┐   ┌────────────────┐   ┌─────────────────┐  │
//! │  │  Engine  │──▶│ TunnelBackend  │──▶│ engine process  │  │
//! │  └──────────┘   └────────────────┘   │ socks/http-in   │  │
//! │                                      └─────────────────┘  │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐   │
//! │  │ System proxy │ │ Kill switch  │ │ Recovery record  │   │
//! │  │ networksetup │ │ pf anchor    │ │ .state.json      │   │
//! │  └──────────────┘ └──────────────┘ └──────────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
//! let mut session = Session::new(
//!     Engine::new(Arc::new(XrayProcessBackend::new("xray", engine_json))),
//!     Arc::new(NetworkSetupProxy::new(runner.clone())),
//!     Arc::new(PfFirewall::new(runner)),
//!     Arc::new(DnsResolver::new()),
//!     RecoveryStore::in_dir(&config_dir),
//! );
//!
//! let report = session.connect(request, ConnectOptions::default()).await?;
//! // ...
//! session.disconnect().await;
//! ```

mod backend;
mod bypass;
mod command;
mod engine;
mod kill_switch;
pub mod latency;
mod recovery;
mod resolver;
mod session;
mod sysproxy;
pub mod traffic_log;
pub mod verify;

pub use backend::{BackendError, TunnelBackend, TunnelInstance, XrayProcessBackend, READY_TIMEOUT};
pub use bypass::bypass_addresses;
pub use command::{args, run_privileged, CommandError, CommandRunner, SystemRunner};
pub use engine::{ConnectionState, Engine, EngineError, EngineStatus, StartRequest};
pub use kill_switch::{
    generate_rules, FirewallController, FirewallError, KillSwitchPolicy, PfFirewall, ANCHOR,
};
pub use latency::{probe_all, ProbeResult, PROBE_TIMEOUT, UNREACHABLE};
pub use recovery::{
    kill_switch_notice, run_recovery, RecoveryError, RecoveryOutcome, RecoveryRecord,
    RecoveryStore, RECORD_FILE,
};
pub use resolver::{DnsError, DnsResolver, HostResolver};
pub use session::{ConnectOptions, ConnectReport, DisconnectReport, Session, SessionError};
pub use sysproxy::{pick_network_service, NetworkSetupProxy, ProxyError, SystemProxyController};
pub use traffic_log::LogEntry;
pub use verify::{direct_ip, verify_exit_ip, VerifyError};
