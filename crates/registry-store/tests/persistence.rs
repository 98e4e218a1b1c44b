//! Durability across close and reopen, and the on-disk layouts.

use std::fs;

use registry_store::{
    BackendKind, DocumentStore, Filter, StoreConfig, Update, UpdateOptions, Value, WriteModel,
};
use serde_json::json;
use tempfile::TempDir;

fn config(dir: &TempDir, backend: BackendKind) -> StoreConfig {
    StoreConfig::default()
        .with_backend(backend)
        .with_cache_dir(dir.path().join(".cache"))
}

fn seed(store: &DocumentStore) {
    let plugins = store.plugins().unwrap();
    for (name, version) in [("a", "1.0.0"), ("b", "0.3.1"), ("c", "2.0.0")] {
        plugins
            .update_one(
                &Filter::new().eq("package.name", name),
                &Update::new().set("package", Value::from(json!({ "name": name, "version": version }))),
                UpdateOptions::upsert(),
            )
            .unwrap();
    }
    store
        .system_settings()
        .unwrap()
        .find_one_and_update(&Filter::new().eq("_id", "stats"), &Update::new().inc("views", 1))
        .unwrap();
}

fn counts(store: &DocumentStore) -> (u64, u64) {
    (
        store.plugins().unwrap().count_documents().unwrap(),
        store.system_settings().unwrap().count_documents().unwrap(),
    )
}

#[test]
fn snapshot_counts_survive_close() {
    let dir = TempDir::new().unwrap();
    let before = {
        let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
        seed(&store);
        let before = counts(&store);
        store.close().unwrap();
        before
    };
    let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
    assert_eq!(counts(&store), before);
    assert_eq!(before, (3, 1));
}

#[test]
fn snapshot_is_durable_without_close() {
    let dir = TempDir::new().unwrap();
    {
        let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
        seed(&store);
    }
    let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
    assert_eq!(counts(&store), (3, 1));
}

#[test]
fn snapshot_file_layout() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
    seed(&store);
    store.close().unwrap();

    let path = store.config().snapshot_path();
    assert!(path.ends_with(".cache/localdb.json"));
    let on_disk: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(on_disk["plugins"].as_array().unwrap().len(), 3);
    assert_eq!(
        on_disk["system_settings"],
        json!([ { "_id": "stats", "views": 1 } ])
    );
}

#[test]
fn corrupt_snapshot_is_an_empty_store() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, BackendKind::Snapshot);
    fs::create_dir_all(&config.cache_dir).unwrap();
    fs::write(config.snapshot_path(), "[1, 2").unwrap();

    let store = DocumentStore::new(config);
    assert_eq!(counts(&store), (0, 0));
    seed(&store);
    assert_eq!(counts(&store), (3, 1));
}

#[test]
fn store_stays_usable_after_close() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
    seed(&store);
    store.close().unwrap();
    store
        .plugins()
        .unwrap()
        .delete_many(&Filter::new().eq("package.name", "a"))
        .unwrap();
    store.close().unwrap();

    let reopened = DocumentStore::new(config(&dir, BackendKind::Snapshot));
    assert_eq!(counts(&reopened), (2, 1));
}

#[test]
fn snapshot_keeps_bulk_writes_before_a_failure() {
    let dir = TempDir::new().unwrap();
    {
        let store = DocumentStore::new(config(&dir, BackendKind::Snapshot));
        let models = vec![
            WriteModel::UpdateOne {
                filter: Filter::new().eq("_id", "one"),
                update: Update::new().set("v", 1),
                upsert: true,
            },
            WriteModel::UpdateOne {
                filter: Filter::new().eq("_id", "two"),
                update: Update::new().inc("v", 1),
                upsert: true,
            },
            WriteModel::UpdateOne {
                filter: Filter::new().eq("_id", "three"),
                update: Update::new().set("v", 3),
                upsert: true,
            },
        ];
        assert!(store.system_settings().unwrap().bulk_write(&models).is_err());
        // Dropped without close.
    }

    let reopened = DocumentStore::new(config(&dir, BackendKind::Snapshot));
    let settings = reopened.system_settings().unwrap();
    assert_eq!(settings.count_documents().unwrap(), 1);
    let one = settings.find_one(&Filter::new().eq("_id", "one")).unwrap().unwrap();
    assert_eq!(one.get("v"), Some(&Value::Int(1)));
    assert!(settings.find_one(&Filter::new().eq("_id", "two")).unwrap().is_none());
    assert!(settings.find_one(&Filter::new().eq("_id", "three")).unwrap().is_none());
}

#[test]
fn open_standard_reads_project_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(registry_store::PROJECT_CONFIG_FILE),
        "cache_dir = \"state\"\nsnapshot_file = \"db.json\"\n",
    )
    .unwrap();
    let store = DocumentStore::open_standard(Some(dir.path())).unwrap();
    if store.config().backend != BackendKind::Snapshot {
        // REGISTRY_STORE_BACKEND is set in this environment.
        return;
    }
    seed(&store);
    assert!(dir.path().join("state").join("db.json").is_file());
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn counts_survive_close() {
        let dir = TempDir::new().unwrap();
        let before = {
            let store = DocumentStore::new(config(&dir, BackendKind::Sqlite));
            seed(&store);
            let before = counts(&store);
            store.close().unwrap();
            before
        };
        let store = DocumentStore::new(config(&dir, BackendKind::Sqlite));
        assert_eq!(counts(&store), before);
        assert_eq!(before, (3, 1));
    }

    #[test]
    fn writes_are_lost_without_close() {
        let dir = TempDir::new().unwrap();
        {
            let store = DocumentStore::new(config(&dir, BackendKind::Sqlite));
            seed(&store);
        }
        let store = DocumentStore::new(config(&dir, BackendKind::Sqlite));
        assert_eq!(counts(&store), (0, 0));
    }

    #[test]
    fn engine_image_tables() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new(config(&dir, BackendKind::Sqlite));
        seed(&store);
        store.close().unwrap();

        let conn = Connection::open(store.config().sqlite_path()).unwrap();
        let mut stmt = conn
            .prepare("SELECT package_name, package_version, data FROM plugins ORDER BY package_name")
            .unwrap();
        let rows: Vec<(String, Option<String>, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].0, "b");
        assert_eq!(rows[1].1.as_deref(), Some("0.3.1"));
        let blob: serde_json::Value = serde_json::from_str(&rows[1].2).unwrap();
        assert_eq!(blob, json!({ "package": { "name": "b", "version": "0.3.1" } }));

        let (id, data): (String, String) = conn
            .query_row("SELECT id, data FROM system_settings", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(id, "stats");
        let blob: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(blob, json!({ "_id": "stats", "views": 1 }));
    }

    #[test]
    fn corrupt_image_is_an_empty_store() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, BackendKind::Sqlite);
        fs::create_dir_all(&config.cache_dir).unwrap();
        fs::write(config.sqlite_path(), b"not an engine image\n".repeat(64)).unwrap();

        let store = DocumentStore::new(config);
        assert_eq!(counts(&store), (0, 0));
        seed(&store);
        store.close().unwrap();

        let reopened = DocumentStore::new(store.config().clone());
        assert_eq!(counts(&reopened), (3, 1));
    }

    #[test]
    fn backends_keep_separate_files() {
        let dir = TempDir::new().unwrap();
        let snapshot = DocumentStore::new(config(&dir, BackendKind::Snapshot));
        seed(&snapshot);
        snapshot.close().unwrap();

        let sqlite = DocumentStore::new(config(&dir, BackendKind::Sqlite));
        assert_eq!(counts(&sqlite), (0, 0));
    }
}
