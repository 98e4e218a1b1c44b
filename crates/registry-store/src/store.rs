use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BackendKind, ConfigError};
use crate::filter::Filter;
use crate::path::set_path;
use crate::update::Update;
use crate::value::{Document, Value};

/// Options for `update_one`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Create the document when nothing matches the filter.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Outcome of a single `update_one`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub upserted: bool,
}

impl UpdateResult {
    pub fn matched() -> Self {
        Self {
            matched_count: 1,
            upserted: false,
        }
    }

    pub fn upserted() -> Self {
        Self {
            matched_count: 0,
            upserted: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub matched_count: u64,
    pub upserted_count: u64,
}

/// One entry of a `bulk_write` batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    UpdateOne {
        filter: Filter,
        update: Update,
        upsert: bool,
    },
}

impl WriteModel {
    /// Parse `{ "updateOne": { "filter": .., "update": .., "upsert": bool } }`.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let mut outer = value.into_object().ok_or_else(|| {
            StoreError::InvalidUpdate("write model must be an object".to_string())
        })?;
        let mut body = outer
            .remove("updateOne")
            .and_then(Value::into_object)
            .ok_or_else(|| {
                StoreError::InvalidUpdate("write model must contain an `updateOne` object".to_string())
            })?;
        if let Some(key) = outer.keys().next() {
            return Err(StoreError::InvalidUpdate(format!(
                "unsupported write model `{}`",
                key
            )));
        }
        let filter = Filter::from_value(body.remove("filter").unwrap_or(Value::Null))?;
        let update = Update::from_value(
            body.remove("update")
                .unwrap_or_else(|| Value::Object(Document::new())),
        )?;
        let upsert = match body.remove("upsert") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "`upsert` expects a bool, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(WriteModel::UpdateOne {
            filter,
            update,
            upsert,
        })
    }
}

impl TryFrom<serde_json::Value> for WriteModel {
    type Error = StoreError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        WriteModel::from_value(Value::from(value))
    }
}

/// The capability set every persistence backend implements.
///
/// Filtering and update semantics are identical across backends; only
/// durability differs (see each backend's `flush`).
pub trait CollectionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// All documents in `collection` matching `filter`.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Apply a `$set`-only update to the first match, or insert when
    /// `options.upsert` is set and nothing matches.
    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError>;

    /// Remove every matching document.
    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<DeleteResult, StoreError>;

    /// Total number of documents in `collection`.
    fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;

    /// Apply `$inc` and `$set` to the first match, creating it if absent,
    /// and return the updated document.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Document, StoreError>;

    /// Make all state durable at the backend's cache path.
    fn flush(&self) -> Result<(), StoreError>;

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    /// Run each model in order. Not atomic: a failure stops the batch and
    /// leaves earlier writes applied.
    fn bulk_write(
        &self,
        collection: &str,
        models: &[WriteModel],
    ) -> Result<BulkWriteResult, StoreError> {
        let mut result = BulkWriteResult::default();
        for model in models {
            match model {
                WriteModel::UpdateOne {
                    filter,
                    update,
                    upsert,
                } => {
                    let outcome = self.update_one(
                        collection,
                        filter,
                        update,
                        UpdateOptions { upsert: *upsert },
                    )?;
                    result.matched_count += outcome.matched_count;
                    if outcome.upserted {
                        result.upserted_count += 1;
                    }
                }
            }
        }
        Ok(result)
    }
}

/// Errors from the document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Document in `{collection}` has no string primary key at `{path}`")]
    MissingPrimaryKey { collection: String, path: String },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Backend not compiled in: {0}")]
    BackendUnavailable(BackendKind),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// `update_one` only carries `$set`; `$inc` belongs to `find_one_and_update`.
pub(crate) fn ensure_set_only(update: &Update) -> Result<(), StoreError> {
    if update.has_inc() {
        return Err(StoreError::InvalidUpdate(
            "`$inc` is only supported by find_one_and_update".to_string(),
        ));
    }
    Ok(())
}

/// The document an upsert creates: the filter's literal equalities, then
/// the update applied on top.
pub(crate) fn upsert_document(filter: &Filter, update: &Update) -> Document {
    let mut doc = Document::new();
    for (path, value) in filter.equalities() {
        set_path(&mut doc, path, value.clone());
    }
    update.apply(&mut doc);
    doc
}

/// `<path>.tmp`, written first and renamed over `path`.
pub(crate) fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    #[test]
    fn store_error_display() {
        let err = StoreError::UnknownCollection("users".into());
        assert!(err.to_string().contains("users"));

        let err = StoreError::MissingPrimaryKey {
            collection: "plugins".into(),
            path: "package.name".into(),
        };
        assert!(err.to_string().contains("package.name"));
    }

    #[test]
    fn upsert_seeds_filter_equalities() {
        let filter = Filter::new().eq("_id", "stats").exists("views", false);
        let doc = upsert_document(&filter, &Update::new().inc("views", 1));
        assert_eq!(doc, document_from_json(json!({ "_id": "stats", "views": 1 })));
    }

    #[test]
    fn upsert_update_wins_over_seed() {
        let filter = Filter::new().eq("package.name", "a");
        let update = Update::new().set("package", Value::from(json!({ "name": "a", "version": "1" })));
        let doc = upsert_document(&filter, &update);
        assert_eq!(
            doc,
            document_from_json(json!({ "package": { "name": "a", "version": "1" } }))
        );
    }

    #[test]
    fn set_only_guard() {
        assert!(ensure_set_only(&Update::new().set("a", 1)).is_ok());
        assert!(matches!(
            ensure_set_only(&Update::new().inc("a", 1)),
            Err(StoreError::InvalidUpdate(_))
        ));
    }

    #[test]
    fn parse_write_model() {
        let model = WriteModel::try_from(json!({
            "updateOne": {
                "filter": { "package.name": "a" },
                "update": { "$set": { "package": { "name": "a" } } },
                "upsert": true,
            }
        }))
        .unwrap();
        let WriteModel::UpdateOne { filter, update, upsert } = model;
        assert!(upsert);
        assert_eq!(filter, Filter::new().eq("package.name", "a"));
        assert_eq!(update.ops.len(), 1);
    }

    #[test]
    fn parse_write_model_rejects_other_kinds() {
        let err = WriteModel::try_from(json!({ "deleteOne": { "filter": {} } })).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }

    #[test]
    fn temp_path_is_a_sibling() {
        let tmp = sibling_temp_path(Path::new("/a/b/localdb.json"));
        assert_eq!(tmp, PathBuf::from("/a/b/localdb.json.tmp"));
    }
}
