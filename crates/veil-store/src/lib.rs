//! Veil Store - Servers, Subscriptions and Preferences
//!
//! Everything the client keeps on disk between runs:
//!
//! - `servers.json`: the saved server list ([`ServerStore`])
//! - `config.toml`: ports, last used server, split tunnel rules ([`AppConfig`])
//! - subscription imports that refresh a group of servers at once
//!
//! All files live in one directory ([`AppPaths`]) and are written
//! atomically with owner-only permissions.

mod config;
pub mod fsutil;
mod paths;
mod select;
mod store;
pub mod subscription;

pub use config::{
    AppConfig, ConfigError, EngineSection, ProxySection, ServerSection, SplitTunnelSection,
};
pub use paths::{AppPaths, NoConfigDir, CONFIG_DIR_ENV};
pub use select::{select_server, SelectError};
pub use store::{ServerStore, StoreError};
pub use subscription::SubscriptionError;
