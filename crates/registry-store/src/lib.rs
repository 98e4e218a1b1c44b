//! Embedded document store for the plugin registry cache.
//!
//! Collections of JSON-like documents are queried and updated with a small
//! Mongo-style vocabulary (`Eq`, `$exists`, `$in` filters; `$set`, `$inc`
//! updates) against one of two interchangeable backends: a JSON snapshot
//! file rewritten on every mutation, or an in-memory SQLite engine whose
//! image is exported on `close()`.

pub mod collection;
pub mod config;
pub mod database;
pub mod filter;
pub mod path;
pub mod schema;
pub mod snapshot_store;
pub mod store;
pub mod update;
pub mod value;

#[cfg(feature = "sqlite")]
mod sql_filter;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use collection::*;
pub use config::*;
pub use database::*;
pub use filter::*;
pub use path::*;
pub use schema::*;
pub use snapshot_store::*;
pub use store::*;
pub use update::*;
pub use value::*;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStore;
