//! Well-known file locations

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "VEIL_CONFIG_DIR";

#[derive(Debug, Error)]
#[error("could not determine the user config directory; set VEIL_CONFIG_DIR")]
pub struct NoConfigDir;

/// Files under the config directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    dir: PathBuf,
}

impl AppPaths {
    /// Paths rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$VEIL_CONFIG_DIR`, else `<user config dir>/veil`
    pub fn discover() -> Result<Self, NoConfigDir> {
        Self::resolve(std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
    }

    fn resolve(override_dir: Option<PathBuf>) -> Result<Self, NoConfigDir> {
        if let Some(dir) = override_dir.filter(|d| !d.as_os_str().is_empty()) {
            return Ok(Self::new(dir));
        }
        dirs::config_dir()
            .map(|base| Self::new(base.join("veil")))
            .ok_or(NoConfigDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    pub fn servers_file(&self) -> PathBuf {
        self.dir.join("servers.json")
    }

    /// Crash recovery record
    pub fn state_file(&self) -> PathBuf {
        self.dir.join(".state.json")
    }

    /// Generated engine configuration
    pub fn engine_config(&self) -> PathBuf {
        self.dir.join("engine.json")
    }

    /// Engine access log, one line per accepted connection
    pub fn access_log(&self) -> PathBuf {
        self.dir.join("access.log")
    }
}
