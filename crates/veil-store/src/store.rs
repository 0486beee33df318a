//! Server Store
//!
//! The saved server list, kept as a JSON array in `servers.json`. Every
//! mutation is written through to disk before it returns.

use crate::fsutil::write_atomic;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;
use veil_proto::{new_id, ServerDescriptor};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading server store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing server store {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("writing server store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding servers: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("server with ID {0:?} not found")]
    NotFound(String),
}

/// Thread-safe, file-backed server list
#[derive(Debug)]
pub struct ServerStore {
    path: PathBuf,
    servers: RwLock<Vec<ServerDescriptor>>,
}

impl ServerStore {
    /// Empty store persisting to `path`; call [`load`](Self::load) to read it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            servers: RwLock::new(Vec::new()),
        }
    }

    /// Create and load in one step
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file. A missing file leaves the store empty.
    pub fn load(&self) -> Result<(), StoreError> {
        let servers = match std::fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        debug!("Loaded {} servers from {}", servers.len(), self.path.display());
        *self.write() = servers;
        Ok(())
    }

    /// Write the current list to disk
    pub fn save(&self) -> Result<(), StoreError> {
        self.persist(&self.read())
    }

    /// Append a server, filling in a missing id or timestamp
    pub fn add(&self, server: ServerDescriptor) -> Result<ServerDescriptor, StoreError> {
        let server = with_metadata(server);
        self.mutate(|servers| {
            servers.push(server.clone());
            Ok(server)
        })
    }

    /// Delete a server by id
    pub fn remove(&self, id: &str) -> Result<ServerDescriptor, StoreError> {
        self.mutate(|servers| {
            let index = servers
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            Ok(servers.remove(index))
        })
    }

    /// Replace the stored server with the same id
    pub fn update(&self, server: ServerDescriptor) -> Result<(), StoreError> {
        self.mutate(|servers| {
            let slot = servers
                .iter_mut()
                .find(|s| s.id == server.id)
                .ok_or_else(|| StoreError::NotFound(server.id.clone()))?;
            *slot = server;
            Ok(())
        })
    }

    /// Swap every server imported from `source` for a fresh set
    ///
    /// Servers from other sources, and manual ones, keep their place.
    pub fn replace_by_source(
        &self,
        source: &str,
        fresh: Vec<ServerDescriptor>,
    ) -> Result<(), StoreError> {
        self.mutate(|servers| {
            servers.retain(|s| s.subscription_source.as_deref() != Some(source));
            servers.extend(fresh.into_iter().map(with_metadata));
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|servers| {
            servers.clear();
            Ok(())
        })
    }

    /// Snapshot of all servers in insertion order
    pub fn list(&self) -> Vec<ServerDescriptor> {
        self.read().clone()
    }

    pub fn find_by_id(&self, id: &str) -> Option<ServerDescriptor> {
        self.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Apply `change` to a copy, write it, then swap it in
    ///
    /// The in-memory list only changes once the file holds the new list.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<ServerDescriptor>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut servers = self.write();
        let mut next = servers.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *servers = next;
        Ok(out)
    }

    fn persist(&self, servers: &[ServerDescriptor]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(servers)?;
        write_atomic(&self.path, &json).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ServerDescriptor>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ServerDescriptor>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn with_metadata(mut server: ServerDescriptor) -> ServerDescriptor {
    if server.id.is_empty() {
        server.id = new_id();
    }
    if server.added_at == DateTime::<Utc>::default() {
        server.added_at = Utc::now();
    }
    server
}
