//! Crash Recovery
//!
//! While the system proxy points at the local listeners, a record of what
//! was changed sits next to the config (`.state.json`). If the process
//! dies without cleaning up, [`run_recovery`] reads the record and puts
//! the proxy settings back.
//!
//! The firewall is never flushed here. A kill switch left behind by a
//! crash keeps blocking until the user reconnects or runs the manual
//! flush command; [`kill_switch_notice`] only reports it.

use crate::sysproxy::SystemProxyController;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use veil_store::fsutil::write_atomic;

/// File name of the record inside the config directory
pub const RECORD_FILE: &str = ".state.json";

/// What the running session changed on the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryRecord {
    pub proxy_set: bool,
    pub socks_port: u16,
    pub http_port: u16,
    pub network_service: String,
    pub pid: u32,
    pub kill_switch_active: bool,
    pub server_address: String,
    pub server_port: u16,
}

/// Recovery errors
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of a recovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing to undo
    Clean,
    /// Proxy settings of `network_service` were reverted
    Reverted {
        network_service: String,
        socks_port: u16,
        http_port: u16,
        pid: u32,
        /// Revert failure, if any; the record is deleted regardless
        proxy_error: Option<String>,
    },
}

/// The recovery record on disk
#[derive(Debug, Clone)]
pub struct RecoveryStore {
    path: PathBuf,
}

impl RecoveryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the record inside `config_dir`
    pub fn in_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join(RECORD_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the record (mode 0600)
    pub fn write(&self, record: &RecoveryRecord) -> Result<(), RecoveryError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path, &json).map_err(|source| RecoveryError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!("Recovery record written to {}", self.path.display());
        Ok(())
    }

    /// Current record; `None` when there is none
    pub fn load(&self) -> Result<Option<RecoveryRecord>, RecoveryError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RecoveryError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| RecoveryError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Record the kill switch state, keeping every other field
    ///
    /// Starts from an empty record when none exists. Turning the kill
    /// switch off clears the server endpoint.
    pub fn update_kill_switch(
        &self,
        active: bool,
        server_address: &str,
        server_port: u16,
    ) -> Result<(), RecoveryError> {
        let mut record = self.load()?.unwrap_or_default();
        record.kill_switch_active = active;
        if active {
            record.server_address = server_address.to_string();
            record.server_port = server_port;
        } else {
            record.server_address.clear();
            record.server_port = 0;
        }
        self.write(&record)
    }

    /// Note that the system proxy has been reverted
    ///
    /// Used when a teardown only partly succeeded and the record has to
    /// stay for the parts still in place. A missing record stays missing.
    pub fn clear_proxy(&self) -> Result<(), RecoveryError> {
        let Some(mut record) = self.load()? else {
            return Ok(());
        };
        record.proxy_set = false;
        self.write(&record)
    }

    /// Delete the record; a missing one is fine
    pub fn remove(&self) -> Result<(), RecoveryError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RecoveryError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Undo the system proxy changes of a crashed session
///
/// A corrupt record is an error and nothing is changed. A failed proxy
/// revert is logged and reported in the outcome, and the record is still
/// deleted.
pub async fn run_recovery(
    store: &RecoveryStore,
    proxy: &dyn SystemProxyController,
) -> Result<RecoveryOutcome, RecoveryError> {
    let Some(record) = store.load()? else {
        return Ok(RecoveryOutcome::Clean);
    };
    if !record.proxy_set {
        return Ok(RecoveryOutcome::Clean);
    }

    info!(
        "Reverting system proxy left by pid {} on {}",
        record.pid, record.network_service
    );
    let proxy_error = match proxy.disable(&record.network_service).await {
        Ok(()) => None,
        Err(e) => {
            warn!("Failed to unset system proxy: {}", e);
            Some(e.to_string())
        }
    };

    store.remove()?;

    Ok(RecoveryOutcome::Reverted {
        network_service: record.network_service,
        socks_port: record.socks_port,
        http_port: record.http_port,
        pid: record.pid,
        proxy_error,
    })
}

/// Banner text when a previous session left the kill switch on
///
/// Unreadable or corrupt records produce no notice.
pub fn kill_switch_notice(store: &RecoveryStore) -> Option<String> {
    match store.load() {
        Ok(Some(record)) if record.kill_switch_active => Some(
            "Kill switch is active from a previous session. Internet is blocked.\n\
             Reconnect to restore internet through the tunnel, or run: \
             sudo pfctl -a com.veil.killswitch -F all"
                .to_string(),
        ),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockProxy;
    use super::*;

    fn dirty() -> RecoveryRecord {
        RecoveryRecord {
            proxy_set: true,
            socks_port: 1080,
            http_port: 8080,
            network_service: "Wi-Fi".into(),
            pid: 4242,
            ..RecoveryRecord::default()
        }
    }

    #[tokio::test]
    async fn test_missing_record_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        let proxy = MockProxy::new("Wi-Fi");

        assert_eq!(run_recovery(&store, &proxy).await.unwrap(), RecoveryOutcome::Clean);
        assert!(proxy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reverts_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        store.write(&dirty()).unwrap();
        let proxy = MockProxy::new("Wi-Fi");

        let outcome = run_recovery(&store, &proxy).await.unwrap();
        assert!(matches!(
            outcome,
            RecoveryOutcome::Reverted { ref network_service, pid: 4242, proxy_error: None, .. }
                if network_service == "Wi-Fi"
        ));
        assert_eq!(proxy.calls(), vec!["disable Wi-Fi"]);
        assert!(!store.path().exists());

        assert_eq!(run_recovery(&store, &proxy).await.unwrap(), RecoveryOutcome::Clean);
        assert_eq!(proxy.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_revert_failure_still_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        store.write(&dirty()).unwrap();
        let proxy = MockProxy {
            fail: true,
            ..MockProxy::new("Wi-Fi")
        };

        let outcome = run_recovery(&store, &proxy).await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Reverted { proxy_error: Some(_), .. }));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_without_proxy_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        store.update_kill_switch(true, "203.0.113.1", 443).unwrap();
        let proxy = MockProxy::new("Wi-Fi");

        assert_eq!(run_recovery(&store, &proxy).await.unwrap(), RecoveryOutcome::Clean);
        assert!(proxy.calls().is_empty());
        assert!(store.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_record_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        fs::write(store.path(), "{ not json").unwrap();
        let proxy = MockProxy::new("Wi-Fi");

        assert!(matches!(
            run_recovery(&store, &proxy).await,
            Err(RecoveryError::Corrupt { .. })
        ));
        assert!(proxy.calls().is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn test_update_kill_switch_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        store.write(&dirty()).unwrap();

        store.update_kill_switch(true, "203.0.113.1", 443).unwrap();
        let record = store.load().unwrap().unwrap();
        assert!(record.proxy_set && record.kill_switch_active);
        assert_eq!(record.socks_port, 1080);
        assert_eq!(record.server_address, "203.0.113.1");
        assert_eq!(record.server_port, 443);

        store.update_kill_switch(false, "ignored", 1).unwrap();
        let record = store.load().unwrap().unwrap();
        assert!(!record.kill_switch_active);
        assert_eq!(record.server_address, "");
        assert_eq!(record.server_port, 0);
        assert_eq!(record.network_service, "Wi-Fi");
    }

    #[test]
    fn test_clear_proxy_keeps_kill_switch() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        store.clear_proxy().unwrap();
        assert!(store.load().unwrap().is_none());

        store.write(&dirty()).unwrap();
        store.update_kill_switch(true, "203.0.113.1", 443).unwrap();
        store.clear_proxy().unwrap();

        let record = store.load().unwrap().unwrap();
        assert!(!record.proxy_set);
        assert!(record.kill_switch_active);
        assert_eq!(record.server_address, "203.0.113.1");
        assert!(kill_switch_notice(&store).is_some());
    }

    #[test]
    fn test_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let store = RecoveryStore::in_dir(&blocker);

        assert!(matches!(store.write(&dirty()), Err(RecoveryError::Write { .. })));
    }

    #[test]
    fn test_partial_record_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        fs::write(store.path(), r#"{"proxy_set":true,"network_service":"Ethernet"}"#).unwrap();

        let record = store.load().unwrap().unwrap();
        assert_eq!(record.network_service, "Ethernet");
        assert!(!record.kill_switch_active);
        assert_eq!(record.pid, 0);
    }

    #[test]
    fn test_kill_switch_notice() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        assert!(kill_switch_notice(&store).is_none());

        store.write(&dirty()).unwrap();
        assert!(kill_switch_notice(&store).is_none());

        store.update_kill_switch(true, "203.0.113.1", 443).unwrap();
        assert!(kill_switch_notice(&store).unwrap().contains("Internet is blocked"));
    }

    #[cfg(unix)]
    #[test]
    fn test_record_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::in_dir(dir.path());
        store.write(&dirty()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
