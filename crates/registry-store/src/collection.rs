use std::vec;

use crate::filter::Filter;
use crate::store::{
    BulkWriteResult, CollectionBackend, DeleteResult, StoreError, UpdateOptions, UpdateResult,
    WriteModel,
};
use crate::update::Update;
use crate::value::Document;

/// A named collection on the active backend.
///
/// Handles are cheap: they borrow the backend and hold only the name, so
/// two handles for the same name see the same documents.
#[derive(Clone)]
pub struct Collection<'a> {
    backend: &'a dyn CollectionBackend,
    name: String,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(backend: &'a dyn CollectionBackend, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Documents matching `filter`. The result is materialized before the
    /// cursor is returned, so later writes do not affect it.
    pub fn find(&self, filter: &Filter) -> Result<Cursor, StoreError> {
        let docs = self.backend.find(&self.name, filter)?;
        Ok(Cursor::new(docs))
    }

    pub fn find_all(&self) -> Result<Vec<Document>, StoreError> {
        self.backend.find(&self.name, &Filter::new())
    }

    pub fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        self.backend.find_one(&self.name, filter)
    }

    pub fn update_one(
        &self,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        self.backend.update_one(&self.name, filter, update, options)
    }

    pub fn bulk_write(&self, models: &[WriteModel]) -> Result<BulkWriteResult, StoreError> {
        self.backend.bulk_write(&self.name, models)
    }

    pub fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, StoreError> {
        self.backend.delete_many(&self.name, filter)
    }

    pub fn count_documents(&self) -> Result<u64, StoreError> {
        self.backend.count_documents(&self.name)
    }

    /// Apply `update` to the first match, creating the document when none
    /// matches, and return the document as stored.
    ///
    /// A created document starts from the filter's literal equalities, so
    /// `{_id: "stats"}` with `$inc: {views: 1}` returns `{_id: "stats", views: 1}`.
    pub fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<Document, StoreError> {
        self.backend.find_one_and_update(&self.name, filter, update)
    }
}

impl std::fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

/// Result set of a `find`.
#[derive(Debug)]
pub struct Cursor {
    docs: vec::IntoIter<Document>,
}

impl Cursor {
    fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: docs.into_iter(),
        }
    }

    /// Remaining documents.
    pub fn to_vec(self) -> Vec<Document> {
        self.docs.collect()
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.docs.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot_store::SnapshotStore;
    use crate::value::Value;
    use tempfile::TempDir;

    #[test]
    fn handles_share_backend_state() {
        let dir = TempDir::new().unwrap();
        let backend = SnapshotStore::open(dir.path().join("localdb.json"), true);
        let first = Collection::new(&backend, "system_settings");
        let second = Collection::new(&backend, "system_settings");

        first
            .find_one_and_update(&Filter::new().eq("_id", "stats"), &Update::new().inc("views", 1))
            .unwrap();
        assert_eq!(second.count_documents().unwrap(), 1);
        assert_eq!(second.name(), "system_settings");
    }

    #[test]
    fn created_document_carries_filter_equalities() {
        let dir = TempDir::new().unwrap();
        let backend = SnapshotStore::open(dir.path().join("localdb.json"), true);
        let settings = Collection::new(&backend, "system_settings");
        let doc = settings
            .find_one_and_update(&Filter::new().eq("_id", "stats"), &Update::new().inc("views", 1))
            .unwrap();
        assert_eq!(doc.get("_id"), Some(&Value::from("stats")));
        assert_eq!(doc.get("views"), Some(&Value::Int(1)));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn cursor_is_a_snapshot() {
        let dir = TempDir::new().unwrap();
        let backend = SnapshotStore::open(dir.path().join("localdb.json"), true);
        let settings = Collection::new(&backend, "system_settings");
        for id in ["a", "b"] {
            settings
                .update_one(
                    &Filter::new().eq("_id", id),
                    &Update::new().set("on", true),
                    UpdateOptions::upsert(),
                )
                .unwrap();
        }

        let mut cursor = settings.find(&Filter::new().eq("on", true)).unwrap();
        assert_eq!(cursor.len(), 2);
        settings.delete_many(&Filter::new()).unwrap();

        let first = cursor.next().unwrap();
        assert_eq!(first.get("_id"), Some(&Value::from("a")));
        assert_eq!(cursor.to_vec().len(), 1);
        assert!(settings.find_all().unwrap().is_empty());
    }
}
