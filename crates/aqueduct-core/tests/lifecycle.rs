use std::fs;
use std::sync::Arc;

use aqueduct_core::migration::{discover, Direction, FileMigration, Strategy};
use aqueduct_core::query::{field, Source};
use aqueduct_core::testing::MemoryStore;
use aqueduct_core::{Adapter, AdapterConfig, AdapterError, EntitySchema, Operation, Query};
use serde_json::{json, Value};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, body: Value) {
    fs::write(dir.path().join(name), serde_json::to_vec_pretty(&body).unwrap()).unwrap();
}

fn migrations_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir,
        "20240101000000_create_users.json",
        json!({
            "change": [
                {"create": {"object": "collection", "name": "users", "columns": [
                    {"op": "add", "name": "name", "type": {"primitive": "string"}, "options": {"null": false}}
                ]}},
                {"create": {"object": "index", "collection": "users", "fields": ["name"], "unique": true}}
            ]
        }),
    );
    write(
        &dir,
        "20240102000000_add_age.json",
        json!({
            "change": [
                {"alter_collection": {
                    "collection": {"name": "users"},
                    "columns": [{"op": "add", "name": "age", "type": {"primitive": "integer"}}]
                }}
            ]
        }),
    );
    write(
        &dir,
        "20240103000000_user_search.json",
        json!({
            "up": [
                {"create": {"object": "analyzer", "name": "norm_en", "type": "norm",
                    "properties": {"locale": "en"}}},
                {"create": {"object": "view", "name": "user_search",
                    "links": {"users": {"analyzers": ["norm_en"], "includeAllFields": true}}}}
            ],
            "down": [
                {"drop": {"object": "view", "name": "user_search"}},
                {"drop": {"object": "analyzer", "name": "norm_en", "type": "norm"}}
            ]
        }),
    );
    fs::write(dir.path().join("notes.txt"), "not a migration").unwrap();
    dir
}

#[test]
fn migrate_use_and_roll_back() {
    let dir = migrations_dir();
    let entries = discover(&[dir.path()]).unwrap();
    assert_eq!(entries.len(), 3);

    let store = MemoryStore::default();
    let adapter = Adapter::new(&store);
    let migrator = adapter.migrator();
    let ran = migrator.run(&entries, Direction::Up, Strategy::All).unwrap();
    assert_eq!(ran, vec![20240101000000, 20240102000000, 20240103000000]);

    let users = store.collection(None, "users").unwrap();
    let props = &users["schema"]["rule"]["properties"];
    assert_eq!(props["name"]["type"], "string");
    assert_eq!(props["age"]["type"], json!(["integer", "null"]));
    assert_eq!(users["schema"]["rule"]["required"], json!(["name"]));
    assert_eq!(store.indexes(None, "users")[0]["name"], "users_name_index");
    assert!(store.view(None, "user_search").is_some());

    let schema = Arc::new(EntitySchema::document("User", "users").with_fields(["name", "age"]));
    let mut ann = serde_json::Map::new();
    ann.insert("name".into(), json!("Ann"));
    ann.insert("age".into(), json!(31));
    let inserted = adapter.insert(&schema, ann, None).unwrap();
    let key = inserted["id"].as_str().unwrap().to_string();

    let mut query = Query::new(Source::entity(schema.clone()));
    let name = query.bind("Ann");
    let query = query.filter(field(0, "name").equals(name));
    let rows = adapter.execute(&query, Operation::Select, None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(key));
    assert_eq!(rows[0]["age"], 31);

    let ran = migrator
        .run(&entries, Direction::Down, Strategy::Step(2))
        .unwrap();
    assert_eq!(ran, vec![20240103000000, 20240102000000]);
    assert!(store.view(None, "user_search").is_none());
    assert!(store.analyzer(None, "norm_en").is_none());
    let users = store.collection(None, "users").unwrap();
    assert!(users["schema"]["rule"]["properties"].get("age").is_none());
    assert_eq!(migrator.applied_versions().unwrap(), vec![20240101000000]);
}

#[test]
fn bad_migration_leaves_bookkeeping_untouched() {
    let dir = migrations_dir();
    write(
        &dir,
        "20240104000000_broken.json",
        json!({
            "change": [
                {"create": {"object": "collection", "name": "users"}}
            ]
        }),
    );
    let entries = discover(&[dir.path()]).unwrap();
    let store = MemoryStore::default();
    let adapter = Adapter::with_config(&store, AdapterConfig::default());
    let migrator = adapter.migrator();

    let err = migrator
        .run(&entries, Direction::Up, Strategy::All)
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(migrator.applied_versions().unwrap().len(), 3);
    assert_eq!(store.open_transactions(), 0);

    let status = migrator.status(&entries).unwrap();
    assert_eq!(status.iter().filter(|l| l.applied).count(), 3);
    assert!(!status[3].applied);
}

#[test]
fn irreversible_change_needs_explicit_down() {
    let dir = tempfile::tempdir().unwrap();
    let body = FileMigration {
        change: vec![aqueduct_core::Command::Execute(
            "FOR d IN `users` REMOVE d IN `users`".into(),
        )],
        write_collections: vec!["users".into()],
        ..FileMigration::default()
    };
    write(&dir, "1_purge.json", serde_json::to_value(&body).unwrap());
    let entries = discover(&[dir.path()]).unwrap();

    let store = MemoryStore::default();
    let adapter = Adapter::new(&store);
    adapter
        .execute_ddl(aqueduct_core::Command::Create(
            aqueduct_core::migration::Collection::new("users").into(),
        ))
        .unwrap();
    let migrator = adapter.migrator();
    migrator.run(&entries, Direction::Up, Strategy::All).unwrap();
    let err = migrator
        .run(&entries, Direction::Down, Strategy::All)
        .unwrap_err();
    assert!(matches!(err, AdapterError::Irreversible(_)));
    assert_eq!(migrator.applied_versions().unwrap(), vec![1]);
}
