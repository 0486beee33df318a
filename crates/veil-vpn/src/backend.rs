//! Tunnel Backend
//!
//! The engine hands a compiled configuration to a [`TunnelBackend`] and
//! gets back a running [`TunnelInstance`]. The shipped backend runs the
//! external proxy engine as a child process.
//!
//! # Launch
//!
//! 1. Make sure no other process holds the inbound ports
//! 2. Write the configuration JSON (mode 0600)
//! 3. Spawn `<binary> run -c <file>`
//! 4. Wait until the SOCKS inbound accepts connections and the child is
//!    still alive shortly after
//!
//! If the child exits first, or the port never opens, the child is killed
//! and the launch fails.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use veil_route::{CompiledTunnelConfig, LISTEN_ADDR};
use veil_store::fsutil::write_atomic;

/// How long a freshly spawned engine gets to open its SOCKS port
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

const READY_POLL: Duration = Duration::from_millis(100);

/// Time the child must survive after its port opens
const READY_GRACE: Duration = Duration::from_millis(300);

/// Backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("serializing engine config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("writing engine config {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("starting {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine exited during startup ({0})")]
    Exited(String),

    #[error("engine did not open SOCKS port {0} in time")]
    NotReady(u16),

    #[error("local port {port} is unavailable: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("config has no SOCKS inbound")]
    NoSocksInbound,

    #[error("stopping engine: {0}")]
    Stop(#[source] std::io::Error),
}

/// A running tunnel
#[async_trait]
pub trait TunnelInstance: Send + Sync {
    /// Stop the tunnel and release its resources
    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Starts tunnels from compiled configurations
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    /// Start a tunnel. On failure nothing is left running.
    async fn launch(
        &self,
        config: &CompiledTunnelConfig,
    ) -> Result<Box<dyn TunnelInstance>, BackendError>;
}

/// Runs the external proxy engine as a child process
pub struct XrayProcessBackend {
    binary: String,
    config_path: PathBuf,
    ready_timeout: Duration,
}

impl XrayProcessBackend {
    /// `binary` is looked up on `PATH` when not absolute
    pub fn new(binary: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
            ready_timeout: READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn write_config(&self, config: &CompiledTunnelConfig) -> Result<(), BackendError> {
        let json = config.to_json_pretty()?;
        write_atomic(&self.config_path, json.as_bytes()).map_err(|source| {
            BackendError::WriteConfig {
                path: self.config_path.clone(),
                source,
            }
        })
    }
}

#[async_trait]
impl TunnelBackend for XrayProcessBackend {
    async fn launch(
        &self,
        config: &CompiledTunnelConfig,
    ) -> Result<Box<dyn TunnelInstance>, BackendError> {
        let socks_port = config
            .inbound("socks-in")
            .map(|inbound| inbound.port)
            .ok_or(BackendError::NoSocksInbound)?;

        for inbound in &config.inbounds {
            ensure_port_free(inbound.port)?;
        }
        self.write_config(config)?;

        let mut child = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        debug!("Spawned {} (pid {:?})", self.binary, child.id());

        if let Err(e) = wait_ready(&mut child, socks_port, self.ready_timeout).await {
            warn!("Engine failed to start: {}", e);
            let _ = child.kill().await;
            return Err(e);
        }

        info!("Engine up, SOCKS on {}:{}", LISTEN_ADDR, socks_port);
        Ok(Box::new(XrayProcess { child }))
    }
}

/// Fail when something already listens on `port`
fn ensure_port_free(port: u16) -> Result<(), BackendError> {
    std::net::TcpListener::bind((LISTEN_ADDR, port))
        .map(drop)
        .map_err(|source| BackendError::PortUnavailable { port, source })
}

/// Poll until the SOCKS port accepts a connection or the child dies
async fn wait_ready(child: &mut Child, port: u16, timeout: Duration) -> Result<(), BackendError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(BackendError::Exited(status.to_string()));
        }
        if TcpStream::connect((LISTEN_ADDR, port)).await.is_ok() {
            tokio::time::sleep(READY_GRACE).await;
            if let Ok(Some(status)) = child.try_wait() {
                return Err(BackendError::Exited(status.to_string()));
            }
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BackendError::NotReady(port));
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

struct XrayProcess {
    child: Child,
}

#[async_trait]
impl TunnelInstance for XrayProcess {
    async fn close(mut self: Box<Self>) -> Result<(), BackendError> {
        if let Ok(Some(_)) = self.child.try_wait() {
            debug!("Engine already exited");
            return Ok(());
        }
        self.child.kill().await.map_err(BackendError::Stop)?;
        info!("Engine stopped");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend for engine and session tests

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct MockBackend {
        pub fail_launch: AtomicBool,
        pub fail_close: Arc<AtomicBool>,
        pub launches: AtomicUsize,
        pub closes: Arc<AtomicUsize>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    struct MockInstance {
        fail_close: Arc<AtomicBool>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TunnelInstance for MockInstance {
        async fn close(self: Box<Self>) -> Result<(), BackendError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(BackendError::Stop(std::io::Error::other("kill failed")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TunnelBackend for MockBackend {
        async fn launch(
            &self,
            _config: &CompiledTunnelConfig,
        ) -> Result<Box<dyn TunnelInstance>, BackendError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_launch.load(Ordering::SeqCst) {
                return Err(BackendError::Exited("exit status: 23".into()));
            }
            Ok(Box::new(MockInstance {
                fail_close: self.fail_close.clone(),
                closes: self.closes.clone(),
            }))
        }
    }
}
