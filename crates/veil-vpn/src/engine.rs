//! Connection Engine
//!
//! Owns the running tunnel and its lifecycle state. Every operation
//! takes the same lock, so start, stop and status never interleave.
//!
//! # States
//!
//! ```text
//! Disconnected --start--> Connecting --ok--> Connected --stop--> Disconnected
//!                              |
//!                              +--err--> Error --start--> Connecting
//! ```
//!
//! System side effects (proxy settings, firewall, recovery record) are not
//! the engine's business; [`crate::Session`] sequences those around it.

use crate::backend::{BackendError, TunnelBackend, TunnelInstance};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};
use veil_proto::ServerDescriptor;
use veil_route::{compile, CompileError, CompileOptions, SplitTunnelPolicy};

/// Engine connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last start attempt failed
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("compiling tunnel config: {0}")]
    Compile(#[from] CompileError),

    #[error("starting tunnel: {0}")]
    Launch(#[source] BackendError),

    #[error("stopping tunnel: {0}")]
    Stop(#[source] BackendError),
}

/// What to connect to
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub descriptor: ServerDescriptor,
    pub socks_port: u16,
    pub http_port: u16,
    pub split_tunnel: Option<SplitTunnelPolicy>,
    /// File the engine appends accepted connections to
    pub access_log: Option<PathBuf>,
}

impl StartRequest {
    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            socks_port: self.socks_port,
            http_port: self.http_port,
            split_tunnel: self.split_tunnel.clone(),
            access_log: self
                .access_log
                .as_ref()
                .map(|path| path.display().to_string()),
        }
    }
}

/// Snapshot of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: ConnectionState,
    /// Server of the running tunnel
    pub server: Option<ServerDescriptor>,
    /// Error text of the last failed start
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    instance: Option<Box<dyn TunnelInstance>>,
    server: Option<ServerDescriptor>,
    last_error: Option<String>,
}

/// Tunnel lifecycle owner
pub struct Engine {
    backend: Arc<dyn TunnelBackend>,
    inner: Mutex<Inner>,
}

impl Engine {
    pub fn new(backend: Arc<dyn TunnelBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Compile and launch a tunnel
    ///
    /// Fails without touching the state while a tunnel is running.
    pub async fn start(&self, request: StartRequest) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.instance.is_some() {
            return Err(EngineError::AlreadyConnected);
        }

        info!(
            "Connecting to {} ({})",
            request.descriptor.name,
            request.descriptor.endpoint()
        );
        inner.state = ConnectionState::Connecting;
        inner.last_error = None;

        let config = match compile(&request.descriptor, &request.compile_options()) {
            Ok(config) => config,
            Err(e) => {
                let e = EngineError::from(e);
                inner.fail(&e);
                return Err(e);
            }
        };

        match self.backend.launch(&config).await {
            Ok(instance) => {
                inner.instance = Some(instance);
                inner.server = Some(request.descriptor);
                inner.state = ConnectionState::Connected;
                info!("Tunnel up");
                Ok(())
            }
            Err(e) => {
                let e = EngineError::Launch(e);
                inner.fail(&e);
                Err(e)
            }
        }
    }

    /// Stop the tunnel if one is running
    ///
    /// Always ends `Disconnected`. A close failure is returned after the
    /// state has been cleared.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let instance = inner.instance.take();
        inner.server = None;
        inner.state = ConnectionState::Disconnected;

        let Some(instance) = instance else {
            return Ok(());
        };
        instance.close().await.map_err(EngineError::Stop)?;
        info!("Tunnel down");
        Ok(())
    }

    pub async fn status(&self) -> EngineStatus {
        let inner = self.inner.lock().await;
        EngineStatus {
            state: inner.state,
            server: inner.server.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.state.is_connected()
    }
}

impl Inner {
    fn fail(&mut self, e: &EngineError) {
        error!("Connect failed: {}", e);
        self.state = ConnectionState::Error;
        self.last_error = Some(e.to_string());
    }
}
