//! Conventional collections and how they are keyed.
//!
//! The registry job writes `plugins`, keyed by `package.name`; the settings
//! manager writes `system_settings`, keyed by `_id`. The relational backend
//! lays each one out as a table with the key column, any denormalized
//! columns, and the document serialized into `data`.

use crate::path::get_path;
use crate::value::{Document, Value};

pub const PLUGINS: &str = "plugins";
pub const SYSTEM_SETTINGS: &str = "system_settings";
pub const DEFAULT_COLLECTION: &str = PLUGINS;

/// A document path mirrored into a SQL column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub path: &'static str,
    pub column: &'static str,
}

/// Layout of a conventional collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub table: &'static str,
    /// Primary key: unique within the collection, always a string.
    pub key: ColumnMapping,
    /// Denormalized string columns kept in sync on every write.
    pub columns: &'static [ColumnMapping],
}

pub const PLUGINS_SCHEMA: CollectionSchema = CollectionSchema {
    name: PLUGINS,
    table: "plugins",
    key: ColumnMapping {
        path: "package.name",
        column: "package_name",
    },
    columns: &[ColumnMapping {
        path: "package.version",
        column: "package_version",
    }],
};

pub const SYSTEM_SETTINGS_SCHEMA: CollectionSchema = CollectionSchema {
    name: SYSTEM_SETTINGS,
    table: "system_settings",
    key: ColumnMapping {
        path: "_id",
        column: "id",
    },
    columns: &[],
};

pub static SCHEMAS: [CollectionSchema; 2] = [PLUGINS_SCHEMA, SYSTEM_SETTINGS_SCHEMA];

/// Look up the conventional layout for a collection name.
pub fn schema_for(collection: &str) -> Option<&'static CollectionSchema> {
    SCHEMAS.iter().find(|s| s.name == collection)
}

impl CollectionSchema {
    /// The primary-key value of `doc`, if present and a string.
    pub fn key_of<'a>(&self, doc: &'a Document) -> Option<&'a str> {
        get_path(doc, self.key.path).and_then(Value::as_str)
    }

    /// Mapping for `path` when it is the key or a denormalized column.
    pub fn column_for(&self, path: &str) -> Option<&ColumnMapping> {
        if self.key.path == path {
            return Some(&self.key);
        }
        self.columns.iter().find(|c| c.path == path)
    }

    pub fn is_key(&self, mapping: &ColumnMapping) -> bool {
        self.key == *mapping
    }

    pub fn create_table_sql(&self) -> String {
        let mut columns = vec![format!("{} TEXT PRIMARY KEY", self.key.column)];
        columns.extend(self.columns.iter().map(|c| format!("{} TEXT", c.column)));
        columns.push("data TEXT".to_string());
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        )
    }

    /// Column list in storage order: key, denormalized columns, `data`.
    pub fn column_list(&self) -> Vec<&'static str> {
        let mut names = vec![self.key.column];
        names.extend(self.columns.iter().map(|c| c.column));
        names.push("data");
        names
    }
}
