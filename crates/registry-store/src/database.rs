//! The store context: configuration plus a lazily opened backend.

use std::path::Path;

use once_cell::sync::OnceCell;

use crate::collection::Collection;
use crate::config::{BackendKind, StoreConfig};
use crate::schema::{DEFAULT_COLLECTION, SYSTEM_SETTINGS};
use crate::snapshot_store::SnapshotStore;
use crate::store::{CollectionBackend, StoreError};

/// Owns the active backend and hands out collection handles.
///
/// The backend is opened on first use, exactly once, even when several
/// threads ask for a collection at the same time. A failed open leaves the
/// store uninitialized so the next call tries again.
pub struct DocumentStore {
    config: StoreConfig,
    backend: OnceCell<Box<dyn CollectionBackend>>,
}

impl DocumentStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            backend: OnceCell::new(),
        }
    }

    /// Store configured from the standard config locations for `project_root`.
    pub fn open_standard(project_root: Option<&Path>) -> Result<Self, StoreError> {
        Ok(Self::new(StoreConfig::load_standard(project_root)?))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.get().is_some()
    }

    fn backend(&self) -> Result<&dyn CollectionBackend, StoreError> {
        self.backend
            .get_or_try_init(|| open_backend(&self.config))
            .map(|b| &**b)
    }

    /// Handle for `name`, opening the backend if this is the first access.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>, StoreError> {
        Ok(Collection::new(self.backend()?, name))
    }

    /// The default collection, `plugins`.
    pub fn plugins(&self) -> Result<Collection<'_>, StoreError> {
        self.collection(DEFAULT_COLLECTION)
    }

    pub fn system_settings(&self) -> Result<Collection<'_>, StoreError> {
        self.collection(SYSTEM_SETTINGS)
    }

    /// Persist all state to the cache path. Does nothing when no collection
    /// was ever requested.
    pub fn close(&self) -> Result<(), StoreError> {
        match self.backend.get() {
            Some(backend) => {
                backend.flush()?;
                tracing::info!(backend = %backend.kind(), "store closed");
                Ok(())
            }
            None => {
                tracing::debug!("close on uninitialized store");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn open_backend(config: &StoreConfig) -> Result<Box<dyn CollectionBackend>, StoreError> {
    tracing::info!(backend = %config.backend, cache_dir = %config.cache_dir.display(), "opening store");
    match config.backend {
        BackendKind::Snapshot => Ok(Box::new(SnapshotStore::open(
            config.snapshot_path(),
            config.pretty_snapshot,
        ))),
        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => Ok(Box::new(crate::sqlite_store::SqliteStore::open(
            config.sqlite_path(),
        )?)),
        #[cfg(not(feature = "sqlite"))]
        BackendKind::Sqlite => Err(StoreError::BackendUnavailable(BackendKind::Sqlite)),
    }
}
