use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::backup::Progress;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, DatabaseName};

use crate::config::BackendKind;
use crate::filter::Filter;
use crate::path::get_path;
use crate::schema::{schema_for, CollectionSchema, SCHEMAS};
use crate::sql_filter::compile_filter;
use crate::store::{
    ensure_parent_dir, ensure_set_only, sibling_temp_path, upsert_document, CollectionBackend,
    DeleteResult, StoreError, UpdateOptions, UpdateResult,
};
use crate::update::Update;
use crate::value::{Document, Value};

/// SQLite-backed implementation of the CollectionBackend trait.
///
/// The engine runs entirely in memory. Its image is restored from
/// `image_path` on open and exported back only by `flush`, so writes are
/// durable only after an explicit close.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    image_path: PathBuf,
}

impl SqliteStore {
    /// Restore the engine image at `image_path`, or start with empty tables
    /// when it is absent or unreadable.
    pub fn open(image_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let image_path = image_path.into();
        let conn = Self::restore_image(&image_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            image_path,
        })
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    fn restore_image(path: &Path) -> Result<Connection, StoreError> {
        let mut conn = open_memory()?;
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no engine image yet, starting empty");
            return Ok(conn);
        }

        let restored = conn
            .restore(DatabaseName::Main, path, None::<fn(Progress)>)
            .map_err(|e| format!("restore: {}", e))
            .and_then(|()| Self::check_layout(&conn));
        match restored {
            Ok(()) => {
                tracing::info!(path = %path.display(), "restored engine image");
                Ok(conn)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "unusable engine image, starting empty: {}", e);
                open_memory()
            }
        }
    }

    /// Tables present in a restored image must carry the expected columns.
    fn check_layout(conn: &Connection) -> Result<(), String> {
        for schema in SCHEMAS.iter() {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![schema.table],
                    |row| row.get::<_, i64>(0),
                )
                .map(|c| c > 0)
                .map_err(|e| format!("inspect {}: {}", schema.table, e))?;
            if exists {
                let sql = format!(
                    "SELECT {} FROM {} LIMIT 0",
                    schema.column_list().join(", "),
                    schema.table
                );
                conn.prepare(&sql)
                    .map_err(|e| format!("layout of {}: {}", schema.table, e))?;
            }
        }
        Ok(())
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        let ddl: Vec<String> = SCHEMAS.iter().map(|s| s.create_table_sql()).collect();
        conn.execute_batch(&format!("{};", ddl.join(";\n")))
            .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    /// Layout for a collection that may be written.
    fn writable_schema(collection: &str) -> Result<&'static CollectionSchema, StoreError> {
        schema_for(collection).ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    /// Rows matching `filter`, as (key, document), stopping after `limit`.
    fn select(
        conn: &Connection,
        schema: &CollectionSchema,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let compiled = compile_filter(schema, filter);
        let sql = format!(
            "SELECT {}, data FROM {} {}",
            schema.key.column, schema.table, compiled.where_clause
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> = compiled
            .params
            .iter()
            .map(|p| p as &dyn rusqlite::types::ToSql)
            .collect();

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare select: {} (sql: {})", e, sql)))?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::Storage(format!("select: {}", e)))?;

        let mut matched = Vec::new();
        for row in rows {
            let (key, data) = row.map_err(|e| StoreError::Storage(format!("row: {}", e)))?;
            let doc: Document = serde_json::from_str(&data)?;
            if compiled.exact || filter.matches(&doc) {
                matched.push((key, doc));
                if limit.is_some_and(|n| matched.len() >= n) {
                    break;
                }
            }
        }
        Ok(matched)
    }

    /// Insert `doc`, or rewrite the row currently keyed `previous_key`.
    ///
    /// Both paths use OR REPLACE: a row already holding the document's key
    /// is replaced, keeping at most one document per key.
    fn write(
        conn: &Connection,
        schema: &CollectionSchema,
        previous_key: Option<&str>,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let key = schema
            .key_of(doc)
            .ok_or_else(|| StoreError::MissingPrimaryKey {
                collection: schema.name.to_string(),
                path: schema.key.path.to_string(),
            })?;

        let mut values = vec![SqlValue::Text(key.to_string())];
        for column in schema.columns {
            values.push(match get_path(doc, column.path).and_then(Value::as_str) {
                Some(s) => SqlValue::Text(s.to_string()),
                None => SqlValue::Null,
            });
        }
        values.push(SqlValue::Text(serde_json::to_string(doc)?));

        let columns = schema.column_list();
        let sql = match previous_key {
            Some(previous) => {
                let assignments: Vec<String> =
                    columns.iter().map(|c| format!("{} = ?", c)).collect();
                values.push(SqlValue::Text(previous.to_string()));
                format!(
                    "UPDATE OR REPLACE {} SET {} WHERE {} = ?",
                    schema.table,
                    assignments.join(", "),
                    schema.key.column
                )
            }
            None => {
                let placeholders = vec!["?"; columns.len()];
                format!(
                    "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                    schema.table,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
        };

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
        conn.execute(&sql, params_ref.as_slice())
            .map_err(|e| StoreError::Storage(format!("write {}: {}", schema.table, e)))?;
        Ok(())
    }

    fn delete_keys(
        conn: &Connection,
        schema: &CollectionSchema,
        keys: &[String],
    ) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", schema.table, schema.key.column);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Storage(format!("prepare delete: {}", e)))?;
        let mut deleted = 0;
        for key in keys {
            deleted += stmt
                .execute(params![key])
                .map_err(|e| StoreError::Storage(format!("delete: {}", e)))? as u64;
        }
        Ok(deleted)
    }
}

fn open_memory() -> Result<Connection, StoreError> {
    Connection::open_in_memory().map_err(|e| StoreError::Storage(format!("open_in_memory: {}", e)))
}

impl CollectionBackend for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let Some(schema) = schema_for(collection) else {
            tracing::debug!(collection, "no table for collection, reading as empty");
            return Ok(Vec::new());
        };
        let conn = self.lock()?;
        Ok(Self::select(&conn, schema, filter, None)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let Some(schema) = schema_for(collection) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        Ok(Self::select(&conn, schema, filter, Some(1))?
            .into_iter()
            .next()
            .map(|(_, doc)| doc))
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        ensure_set_only(update)?;
        let schema = Self::writable_schema(collection)?;
        let conn = self.lock()?;

        match Self::select(&conn, schema, filter, Some(1))?.into_iter().next() {
            Some((key, mut doc)) => {
                update.apply(&mut doc);
                Self::write(&conn, schema, Some(&key), &doc)?;
                Ok(UpdateResult::matched())
            }
            None if options.upsert => {
                let doc = upsert_document(filter, update);
                Self::write(&conn, schema, None, &doc)?;
                Ok(UpdateResult::upserted())
            }
            None => Ok(UpdateResult::default()),
        }
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<DeleteResult, StoreError> {
        let schema = Self::writable_schema(collection)?;
        let conn = self.lock()?;
        let compiled = compile_filter(schema, filter);

        let deleted_count = if compiled.exact {
            let sql = format!("DELETE FROM {} {}", schema.table, compiled.where_clause);
            let params_ref: Vec<&dyn rusqlite::types::ToSql> = compiled
                .params
                .iter()
                .map(|p| p as &dyn rusqlite::types::ToSql)
                .collect();
            conn.execute(&sql, params_ref.as_slice())
                .map_err(|e| StoreError::Storage(format!("delete: {} (sql: {})", e, sql)))?
                as u64
        } else {
            let keys: Vec<String> = Self::select(&conn, schema, filter, None)?
                .into_iter()
                .map(|(key, _)| key)
                .collect();
            Self::delete_keys(&conn, schema, &keys)?
        };

        tracing::debug!(collection, deleted_count, "delete_many");
        Ok(DeleteResult { deleted_count })
    }

    fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        let Some(schema) = schema_for(collection) else {
            return Ok(0);
        };
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", schema.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::Storage(format!("count: {}", e)))?;
        Ok(count as u64)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Document, StoreError> {
        let schema = Self::writable_schema(collection)?;
        let conn = self.lock()?;

        let doc = match Self::select(&conn, schema, filter, Some(1))?.into_iter().next() {
            Some((key, mut doc)) => {
                update.apply(&mut doc);
                Self::write(&conn, schema, Some(&key), &doc)?;
                doc
            }
            None => {
                let doc = upsert_document(filter, update);
                Self::write(&conn, schema, None, &doc)?;
                doc
            }
        };
        Ok(doc)
    }

    /// Export the whole engine image: back up into a sibling temp file,
    /// then rename it over the image path.
    fn flush(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        ensure_parent_dir(&self.image_path)?;
        let tmp = sibling_temp_path(&self.image_path);
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }
        conn.backup(DatabaseName::Main, &tmp, None)
            .map_err(|e| StoreError::Storage(format!("export: {}", e)))?;
        fs::rename(&tmp, &self.image_path)?;
        tracing::info!(path = %self.image_path.display(), "engine image exported");
        Ok(())
    }
}
