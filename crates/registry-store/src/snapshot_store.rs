use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::BackendKind;
use crate::filter::Filter;
use crate::path::get_path;
use crate::schema::schema_for;
use crate::store::{
    ensure_parent_dir, ensure_set_only, sibling_temp_path, upsert_document, CollectionBackend,
    DeleteResult, StoreError, UpdateOptions, UpdateResult,
};
use crate::update::Update;
use crate::value::Document;

/// Collection name → documents in insertion order.
type Collections = BTreeMap<String, Vec<Document>>;

/// JSON-file backend: the whole store lives in memory and is rewritten to
/// a single file after every mutation.
pub struct SnapshotStore {
    path: PathBuf,
    pretty: bool,
    collections: Mutex<Collections>,
}

impl SnapshotStore {
    /// Open the snapshot at `path`. A missing or unreadable file yields an
    /// empty store; nothing is written until the first mutation.
    pub fn open(path: impl Into<PathBuf>, pretty: bool) -> Self {
        let path = path.into();
        let collections = Self::load(&path);
        Self {
            path,
            pretty,
            collections: Mutex::new(collections),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Collections {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no snapshot yet, starting empty");
                return Collections::new();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read snapshot, starting empty: {}", e);
                return Collections::new();
            }
        };
        match serde_json::from_str::<Collections>(&text) {
            Ok(collections) => {
                tracing::info!(
                    path = %path.display(),
                    collections = collections.len(),
                    "loaded snapshot"
                );
                collections
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "corrupt snapshot, starting empty: {}", e);
                Collections::new()
            }
        }
    }

    /// Rewrite the whole file: serialize, write a sibling temp file, rename.
    fn persist(&self, collections: &Collections) -> Result<(), StoreError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(collections)?
        } else {
            serde_json::to_vec(collections)?
        };
        ensure_parent_dir(&self.path)?;
        let tmp = sibling_temp_path(&self.path);
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StoreError> {
        self.collections
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}

/// Drop every other document sharing the primary key of `docs[keep]`.
fn drop_key_collisions(collection: &str, docs: &mut Vec<Document>, keep: usize) {
    let Some(schema) = schema_for(collection) else {
        return;
    };
    let Some(key) = get_path(&docs[keep], schema.key.path).cloned() else {
        return;
    };
    let mut index = 0;
    let before = docs.len();
    docs.retain(|doc| {
        let current = index;
        index += 1;
        current == keep || get_path(doc, schema.key.path) != Some(&key)
    });
    if docs.len() < before {
        tracing::debug!(collection, replaced = before - docs.len(), "primary key collision resolved");
    }
}

impl CollectionBackend for SnapshotStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Snapshot
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let collections = self.lock()?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        ensure_set_only(update)?;
        let mut collections = self.lock()?;
        let docs = collections.entry(collection.to_string()).or_default();

        let result = match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                update.apply(&mut docs[index]);
                drop_key_collisions(collection, docs, index);
                UpdateResult::matched()
            }
            None if options.upsert => {
                docs.push(upsert_document(filter, update));
                let index = docs.len() - 1;
                drop_key_collisions(collection, docs, index);
                UpdateResult::upserted()
            }
            None => UpdateResult::default(),
        };

        self.persist(&collections)?;
        Ok(result)
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<DeleteResult, StoreError> {
        let mut collections = self.lock()?;
        let docs = collections.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        let deleted_count = (before - docs.len()) as u64;

        self.persist(&collections)?;
        Ok(DeleteResult { deleted_count })
    }

    fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        let collections = self.lock()?;
        Ok(collections.get(collection).map_or(0, |docs| docs.len() as u64))
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Document, StoreError> {
        let mut collections = self.lock()?;
        let docs = collections.entry(collection.to_string()).or_default();

        let index = match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                update.apply(&mut docs[index]);
                index
            }
            None => {
                docs.push(upsert_document(filter, update));
                docs.len() - 1
            }
        };
        let result = docs[index].clone();
        drop_key_collisions(collection, docs, index);

        self.persist(&collections)?;
        Ok(result)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let collections = self.lock()?;
        self.persist(&collections)?;
        tracing::info!(path = %self.path.display(), "snapshot flushed");
        Ok(())
    }
}
