//! Session
//!
//! Sequences a connection's system side effects around the engine.
//!
//! # Connect
//!
//! 1. Start the engine (the only step whose failure aborts)
//! 2. Detect the network service
//! 3. Write the recovery record, then point the system proxy at the tunnel
//! 4. Optionally engage the kill switch and note it in the record
//! 5. Optionally check the exit IP through the SOCKS listener
//!
//! # Disconnect
//!
//! Kill switch off, engine stop, system proxy off, record deleted.
//!
//! Steps after the engine start are best effort: failures are logged and
//! returned as warnings on the report. The record is written before each
//! host change it covers, and a change is skipped when that write fails.
//! It is deleted only when every change was reverted; otherwise it keeps
//! whatever is still in place.

use crate::bypass::bypass_addresses;
use crate::engine::{Engine, EngineError, EngineStatus, StartRequest};
use crate::kill_switch::{FirewallController, KillSwitchPolicy};
use crate::recovery::{RecoveryRecord, RecoveryStore};
use crate::resolver::HostResolver;
use crate::sysproxy::SystemProxyController;
use crate::verify::verify_exit_ip;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use veil_proto::ServerDescriptor;
use veil_route::SplitTunnelPolicy;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("not connected")]
    NotConnected,
}

/// Optional steps of a connect
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    pub kill_switch: bool,
    /// Fetch the exit IP through the tunnel after connecting
    pub verify_exit: bool,
}

/// What a connect actually achieved
#[derive(Debug, Clone, Default)]
pub struct ConnectReport {
    pub server: Option<ServerDescriptor>,
    pub network_service: Option<String>,
    pub proxy_set: bool,
    pub kill_switch: bool,
    pub exit_ip: Option<String>,
    /// Best-effort steps that failed
    pub warnings: Vec<String>,
}

/// Outcome of a disconnect
#[derive(Debug, Clone, Default)]
pub struct DisconnectReport {
    pub warnings: Vec<String>,
}

/// Live connection state owned by the session
#[derive(Debug, Default)]
struct Live {
    server: Option<ServerDescriptor>,
    socks_port: u16,
    split_tunnel: Option<SplitTunnelPolicy>,
    service: Option<String>,
    proxy_set: bool,
    kill_switch: bool,
}

/// Connect/disconnect orchestration
pub struct Session {
    engine: Engine,
    proxy: Arc<dyn SystemProxyController>,
    firewall: Arc<dyn FirewallController>,
    resolver: Arc<dyn HostResolver>,
    recovery: RecoveryStore,
    live: Live,
}

impl Session {
    pub fn new(
        engine: Engine,
        proxy: Arc<dyn SystemProxyController>,
        firewall: Arc<dyn FirewallController>,
        resolver: Arc<dyn HostResolver>,
        recovery: RecoveryStore,
    ) -> Self {
        Self {
            engine,
            proxy,
            firewall,
            resolver,
            recovery,
            live: Live::default(),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        self.engine.status().await
    }

    pub fn kill_switch_active(&self) -> bool {
        self.live.kill_switch
    }

    /// Bring the tunnel up and apply the system side effects
    pub async fn connect(
        &mut self,
        request: StartRequest,
        options: ConnectOptions,
    ) -> Result<ConnectReport, SessionError> {
        let server = request.descriptor.clone();
        let socks_port = request.socks_port;
        let http_port = request.http_port;
        let split_tunnel = request.split_tunnel.clone();

        self.engine.start(request).await?;

        self.live = Live {
            server: Some(server.clone()),
            socks_port,
            split_tunnel,
            ..Live::default()
        };
        let mut report = ConnectReport {
            server: Some(server),
            ..ConnectReport::default()
        };

        match self.proxy.detect_service().await {
            Ok(service) => {
                let record = RecoveryRecord {
                    proxy_set: true,
                    socks_port,
                    http_port,
                    network_service: service.clone(),
                    pid: std::process::id(),
                    ..RecoveryRecord::default()
                };
                match self.recovery.write(&record) {
                    Ok(()) => match self.proxy.enable(&service, socks_port, http_port).await {
                        Ok(()) => {
                            self.live.proxy_set = true;
                            report.proxy_set = true;
                        }
                        Err(e) => {
                            note(&mut report.warnings, format!("could not set system proxy: {}", e));
                            // Some settings may have been applied; revert them on disconnect
                            self.live.proxy_set = true;
                        }
                    },
                    Err(e) => note(
                        &mut report.warnings,
                        format!("system proxy not set, could not write recovery record: {}", e),
                    ),
                }
                self.live.service = Some(service.clone());
                report.network_service = Some(service);
            }
            Err(e) => note(
                &mut report.warnings,
                format!("could not detect network service: {}", e),
            ),
        }

        if options.kill_switch {
            match self.enable_kill_switch().await {
                Ok(()) => report.kill_switch = true,
                Err(warning) => report.warnings.push(warning),
            }
        }

        if options.verify_exit {
            match verify_exit_ip(socks_port).await {
                Ok(ip) => {
                    info!("Exit IP: {}", ip);
                    report.exit_ip = Some(ip);
                }
                Err(e) => note(&mut report.warnings, format!("could not verify exit IP: {}", e)),
            }
        }

        Ok(report)
    }

    /// Engage the kill switch for the connected server
    ///
    /// Returns the warning text on failure; the tunnel stays up either way.
    pub async fn enable_kill_switch(&mut self) -> Result<(), String> {
        let Some(server) = self.live.server.clone() else {
            return Err(SessionError::NotConnected.to_string());
        };

        let server_ip = match self.resolver.lookup_one(&server.address).await {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!("Resolving {} failed ({}), using it verbatim", server.address, e);
                server.address.clone()
            }
        };
        let bypass = bypass_addresses(self.live.split_tunnel.as_ref(), self.resolver.as_ref()).await;

        let policy = KillSwitchPolicy {
            server_ip: server_ip.clone(),
            server_port: server.port,
            bypass,
        };

        if let Err(e) = self.recovery.update_kill_switch(true, &server_ip, server.port) {
            let warning = format!("kill switch not enabled, could not write recovery record: {}", e);
            warn!("{}", warning);
            return Err(warning);
        }
        if let Err(e) = self.firewall.enable(&policy).await {
            let warning = format!("could not enable kill switch: {}", e);
            warn!("{}", warning);
            self.forget_kill_switch();
            return Err(warning);
        }
        self.live.kill_switch = true;
        Ok(())
    }

    /// Lift the kill switch, leaving the tunnel up
    ///
    /// On failure the rules may still be loaded, so the record keeps them.
    pub async fn disable_kill_switch(&mut self) -> Result<(), String> {
        if let Err(e) = self.firewall.disable().await {
            let warning = format!("could not disable kill switch: {}", e);
            warn!("{}", warning);
            return Err(warning);
        }
        self.live.kill_switch = false;
        self.forget_kill_switch();
        Ok(())
    }

    fn forget_kill_switch(&self) {
        if let Err(e) = self.recovery.update_kill_switch(false, "", 0) {
            warn!("Could not record kill switch state: {}", e);
        }
    }

    /// Tear everything down in reverse order
    ///
    /// Safe to call when nothing is connected.
    pub async fn disconnect(&mut self) -> DisconnectReport {
        let mut report = DisconnectReport::default();

        let mut firewall_left = false;
        if self.live.kill_switch {
            if let Err(warning) = self.disable_kill_switch().await {
                report.warnings.push(warning);
                firewall_left = true;
            }
        }

        if let Err(e) = self.engine.stop().await {
            note(&mut report.warnings, format!("error stopping engine: {}", e));
        }

        let mut proxy_left = false;
        if self.live.proxy_set {
            if let Some(service) = &self.live.service {
                if let Err(e) = self.proxy.disable(service).await {
                    note(&mut report.warnings, format!("could not unset system proxy: {}", e));
                    proxy_left = true;
                }
            }
        }

        let record = match (proxy_left, firewall_left) {
            (false, false) => self.recovery.remove(),
            (false, true) => self.recovery.clear_proxy(),
            (true, _) => Ok(()),
        };
        if let Err(e) = record {
            note(&mut report.warnings, format!("could not update recovery record: {}", e));
        }

        self.live = Live {
            kill_switch: firewall_left,
            ..Live::default()
        };
        info!("Disconnected");
        report
    }
}

fn note(warnings: &mut Vec<String>, warning: String) {
    warn!("{}", warning);
    warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::engine::ConnectionState;
    use crate::kill_switch::FirewallError;
    use crate::recovery::testing::MockProxy;
    use crate::resolver::testing::StaticResolver;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use veil_proto::parse_uri;
    use veil_route::{parse_rule, SplitMode};

    #[derive(Default)]
    struct MockFirewall {
        fail: bool,
        fail_disable: bool,
        /// Record on disk at the moment the rules were loaded
        watch: Mutex<Option<RecoveryStore>>,
        seen: Mutex<Vec<Option<RecoveryRecord>>>,
        enabled: Mutex<Vec<KillSwitchPolicy>>,
        disables: Mutex<usize>,
    }

    fn pfctl_failed() -> crate::command::CommandError {
        crate::command::CommandError::Failed {
            command: "pfctl".into(),
            status: "exit status: 1".into(),
            output: String::new(),
        }
    }

    #[async_trait]
    impl FirewallController for MockFirewall {
        async fn enable(&self, policy: &KillSwitchPolicy) -> Result<(), FirewallError> {
            if let Some(store) = self.watch.lock().unwrap().as_ref() {
                self.seen.lock().unwrap().push(store.load().unwrap());
            }
            if self.fail {
                return Err(FirewallError::Enable(pfctl_failed()));
            }
            self.enabled.lock().unwrap().push(policy.clone());
            Ok(())
        }

        async fn disable(&self) -> Result<(), FirewallError> {
            *self.disables.lock().unwrap() += 1;
            if self.fail_disable {
                return Err(FirewallError::Disable(pfctl_failed()));
            }
            Ok(())
        }

        async fn is_active(&self) -> bool {
            !self.enabled.lock().unwrap().is_empty()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        backend: Arc<MockBackend>,
        proxy: Arc<MockProxy>,
        firewall: Arc<MockFirewall>,
        recovery: RecoveryStore,
        session: Session,
    }

    fn fixture(proxy: MockProxy, firewall: MockFirewall) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        let proxy = Arc::new(proxy);
        let firewall = Arc::new(firewall);
        let resolver = Arc::new(
            StaticResolver::new()
                .with("vpn.example", &["203.0.113.50"])
                .with("intranet.example", &["192.0.2.8"]),
        );
        let recovery = RecoveryStore::in_dir(dir.path());
        let session = Session::new(
            Engine::new(backend.clone()),
            proxy.clone(),
            firewall.clone(),
            resolver,
            recovery.clone(),
        );
        Fixture {
            _dir: dir,
            backend,
            proxy,
            firewall,
            recovery,
            session,
        }
    }

    fn request(split_tunnel: Option<SplitTunnelPolicy>) -> StartRequest {
        StartRequest {
            descriptor: parse_uri("trojan://pw@vpn.example:443#Edge").unwrap(),
            socks_port: 1080,
            http_port: 8080,
            split_tunnel,
            access_log: None,
        }
    }

    fn with_kill_switch() -> ConnectOptions {
        ConnectOptions {
            kill_switch: true,
            verify_exit: false,
        }
    }

    #[tokio::test]
    async fn test_connect_sets_proxy_after_record() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());

        let report = f.session.connect(request(None), ConnectOptions::default()).await.unwrap();
        assert!(report.proxy_set);
        assert!(report.warnings.is_empty());
        assert_eq!(report.network_service.as_deref(), Some("Wi-Fi"));
        assert_eq!(f.proxy.calls(), vec!["enable Wi-Fi 1080 8080"]);

        let record = f.recovery.load().unwrap().unwrap();
        assert!(record.proxy_set);
        assert_eq!(record.network_service, "Wi-Fi");
        assert_eq!(record.pid, std::process::id());
        assert!(!record.kill_switch_active);
        assert_eq!(f.session.status().await.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_engine_failure_aborts_before_side_effects() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());
        f.backend.fail_launch.store(true, Ordering::SeqCst);

        let options = ConnectOptions {
            kill_switch: true,
            verify_exit: false,
        };
        assert!(f.session.connect(request(None), options).await.is_err());
        assert!(f.proxy.calls().is_empty());
        assert!(f.firewall.enabled.lock().unwrap().is_empty());
        assert!(f.recovery.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_service_skips_record_and_proxy() {
        let mut f = fixture(MockProxy::default(), MockFirewall::default());

        let report = f.session.connect(request(None), ConnectOptions::default()).await.unwrap();
        assert!(!report.proxy_set);
        assert_eq!(report.warnings.len(), 1);
        assert!(f.recovery.load().unwrap().is_none());
        assert!(f.session.status().await.state.is_connected());
    }

    #[tokio::test]
    async fn test_kill_switch_uses_resolved_server_and_bypass() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());
        let policy = SplitTunnelPolicy::new(
            SplitMode::Exclusive,
            vec![
                parse_rule("10.0.0.0/8").unwrap(),
                parse_rule("intranet.example").unwrap(),
                parse_rule("*.lan.example").unwrap(),
            ],
        );
        let options = ConnectOptions {
            kill_switch: true,
            verify_exit: false,
        };

        let report = f.session.connect(request(Some(policy)), options).await.unwrap();
        assert!(report.kill_switch);
        assert!(f.session.kill_switch_active());

        let enabled = f.firewall.enabled.lock().unwrap().clone();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].server_ip, "203.0.113.50");
        assert_eq!(enabled[0].server_port, 443);
        assert_eq!(enabled[0].bypass, vec!["10.0.0.0/8", "192.0.2.8"]);

        let record = f.recovery.load().unwrap().unwrap();
        assert!(record.kill_switch_active && record.proxy_set);
        assert_eq!(record.server_address, "203.0.113.50");
    }

    #[tokio::test]
    async fn test_kill_switch_failure_is_a_warning() {
        let firewall = MockFirewall {
            fail: true,
            ..MockFirewall::default()
        };
        let mut f = fixture(MockProxy::new("Wi-Fi"), firewall);
        let options = ConnectOptions {
            kill_switch: true,
            verify_exit: false,
        };

        let report = f.session.connect(request(None), options).await.unwrap();
        assert!(!report.kill_switch);
        assert!(report.warnings[0].contains("kill switch"));
        assert!(f.session.status().await.state.is_connected());
        assert!(!f.recovery.load().unwrap().unwrap().kill_switch_active);
    }

    #[tokio::test]
    async fn test_disconnect_reverses_everything() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());
        let options = ConnectOptions {
            kill_switch: true,
            verify_exit: false,
        };
        f.session.connect(request(None), options).await.unwrap();

        let report = f.session.disconnect().await;
        assert!(report.warnings.is_empty());
        assert_eq!(*f.firewall.disables.lock().unwrap(), 1);
        assert_eq!(f.backend.closes(), 1);
        assert_eq!(f.proxy.calls(), vec!["enable Wi-Fi 1080 8080", "disable Wi-Fi"]);
        assert!(!f.recovery.path().exists());
        assert_eq!(f.session.status().await.state, ConnectionState::Disconnected);
        assert!(!f.session.kill_switch_active());

        // Second disconnect touches nothing
        f.session.disconnect().await;
        assert_eq!(f.proxy.calls().len(), 2);
        assert_eq!(*f.firewall.disables.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_toggle_kill_switch_on_live_session() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());
        assert!(f.session.enable_kill_switch().await.is_err());

        f.session.connect(request(None), ConnectOptions::default()).await.unwrap();
        f.session.enable_kill_switch().await.unwrap();
        assert!(f.recovery.load().unwrap().unwrap().kill_switch_active);

        f.session.disable_kill_switch().await.unwrap();
        let record = f.recovery.load().unwrap().unwrap();
        assert!(!record.kill_switch_active);
        assert!(record.proxy_set);
        assert_eq!(record.server_port, 0);
    }

    #[tokio::test]
    async fn test_kill_switch_recorded_before_rules_load() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());
        *f.firewall.watch.lock().unwrap() = Some(f.recovery.clone());

        f.session.connect(request(None), with_kill_switch()).await.unwrap();

        let seen = f.firewall.seen.lock().unwrap().clone();
        let record = seen[0].clone().unwrap();
        assert!(record.kill_switch_active);
        assert!(record.proxy_set);
        assert_eq!(record.server_address, "203.0.113.50");
        assert_eq!(record.server_port, 443);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_kill_switch_record() {
        let firewall = MockFirewall {
            fail_disable: true,
            ..MockFirewall::default()
        };
        let mut f = fixture(MockProxy::new("Wi-Fi"), firewall);
        f.session.connect(request(None), with_kill_switch()).await.unwrap();

        let report = f.session.disconnect().await;
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("kill switch"));
        assert_eq!(f.proxy.calls(), vec!["enable Wi-Fi 1080 8080", "disable Wi-Fi"]);
        assert_eq!(f.session.status().await.state, ConnectionState::Disconnected);

        let record = f.recovery.load().unwrap().unwrap();
        assert!(record.kill_switch_active);
        assert!(!record.proxy_set);
        assert!(crate::recovery::kill_switch_notice(&f.recovery).is_some());

        // The rules are still loaded, so the next disconnect tries again
        assert!(f.session.kill_switch_active());
        f.session.disconnect().await;
        assert_eq!(*f.firewall.disables.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_proxy_revert_keeps_record() {
        let proxy = MockProxy {
            fail: true,
            ..MockProxy::new("Wi-Fi")
        };
        let mut f = fixture(proxy, MockFirewall::default());

        let report = f.session.connect(request(None), ConnectOptions::default()).await.unwrap();
        assert!(!report.proxy_set);
        assert!(report.warnings[0].contains("system proxy"));

        let report = f.session.disconnect().await;
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(f.proxy.calls(), vec!["enable Wi-Fi 1080 8080", "disable Wi-Fi"]);

        let record = f.recovery.load().unwrap().unwrap();
        assert!(record.proxy_set);
        assert_eq!(record.network_service, "Wi-Fi");
    }

    #[tokio::test]
    async fn test_unwritable_record_leaves_host_untouched() {
        let mut f = fixture(MockProxy::new("Wi-Fi"), MockFirewall::default());
        let blocker = f._dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        f.session.recovery = RecoveryStore::in_dir(&blocker);

        let report = f.session.connect(request(None), with_kill_switch()).await.unwrap();
        assert!(!report.proxy_set);
        assert!(!report.kill_switch);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().all(|w| w.contains("recovery record")));
        assert!(f.proxy.calls().is_empty());
        assert!(f.firewall.enabled.lock().unwrap().is_empty());
        assert!(f.session.status().await.state.is_connected());
    }
}
