//! Application Configuration
//!
//! User preferences persisted as TOML in `config.toml`.
//!
//! ```toml
//! [proxy]
//! socks_port = 1080
//! http_port = 8080
//!
//! [server]
//! last_used = "3f2c..."
//!
//! [split_tunnel]
//! enabled = true
//! mode = "exclusive"
//! rules = [{ value = "10.0.0.0/8", type = "cidr" }]
//!
//! [engine]
//! binary = "xray"
//! ```

use crate::fsutil::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use veil_route::{SplitMode, SplitTunnelPolicy, SplitTunnelRule};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("encoding config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Local listener ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub socks_port: u16,
    pub http_port: u16,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            socks_port: 1080,
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Id of the last server connected to
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_used: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitTunnelSection {
    pub enabled: bool,
    pub mode: SplitMode,
    pub rules: Vec<SplitTunnelRule>,
}

/// External engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Engine executable; bare names are looked up on `PATH`
    pub binary: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            binary: "xray".to_string(),
        }
    }
}

/// All user preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub proxy: ProxySection,
    pub server: ServerSection,
    pub split_tunnel: SplitTunnelSection,
    pub engine: EngineSection,
}

impl AppConfig {
    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write atomically, creating the directory when needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Split-tunnel settings as a routing policy
    pub fn split_tunnel_policy(&self) -> SplitTunnelPolicy {
        SplitTunnelPolicy {
            enabled: self.split_tunnel.enabled,
            mode: self.split_tunnel.mode,
            rules: self.split_tunnel.rules.clone(),
        }
    }

    /// Store a policy back into the split-tunnel section
    pub fn set_split_tunnel_policy(&mut self, policy: SplitTunnelPolicy) {
        self.split_tunnel = SplitTunnelSection {
            enabled: policy.enabled,
            mode: policy.mode,
            rules: policy.rules,
        };
    }

    /// Policy to compile with, if it would change routing
    pub fn active_split_tunnel(&self) -> Option<SplitTunnelPolicy> {
        let policy = self.split_tunnel_policy();
        policy.is_active().then_some(policy)
    }

    pub fn last_used(&self) -> Option<&str> {
        Some(self.server.last_used.as_str()).filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_route::{parse_rule, RuleKind};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config.proxy.socks_port, 1080);
        assert_eq!(config.proxy.http_port, 8080);
        assert_eq!(config.engine.binary, "xray");
        assert!(!config.split_tunnel.enabled);
        assert_eq!(config.split_tunnel.mode, SplitMode::Exclusive);
        assert!(config.last_used().is_none());
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml(
            r#"
            [proxy]
            socks_port = 10808

            [split_tunnel]
            enabled = true
            mode = "inclusive"
            rules = [{ value = "10.0.0.0/8", type = "cidr" }, { value = "*.corp.example", type = "wildcard" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.proxy.socks_port, 10808);
        assert_eq!(config.proxy.http_port, 8080);
        assert_eq!(config.split_tunnel.mode, SplitMode::Inclusive);
        assert_eq!(config.split_tunnel.rules[1].kind, RuleKind::Wildcard);

        let policy = config.active_split_tunnel().unwrap();
        assert!(policy.is_inclusive());
        assert_eq!(policy.rules.len(), 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veil").join("config.toml");

        let mut config = AppConfig::default();
        config.server.last_used = "abc".into();
        let mut policy = config.split_tunnel_policy();
        policy.enabled = true;
        policy.rules.push(parse_rule("example.com").unwrap());
        config.set_split_tunnel_policy(policy);
        config.save(&path).unwrap();

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.last_used(), Some("abc"));
    }

    #[test]
    fn test_inactive_policy() {
        let mut config = AppConfig::default();
        config.split_tunnel.rules.push(parse_rule("10.0.0.0/8").unwrap());
        assert!(config.active_split_tunnel().is_none());

        config.split_tunnel.enabled = true;
        assert!(config.active_split_tunnel().is_some());
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[proxy\nsocks_port = ").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
