//! Migration engine integration tests: version changes, wipes, additive
//! columns, and full data migrations over a shared SQLite connection.

use serde_json::json;
use sqlstore::{
    IndexSchema, Key, QuerySortOrder, Schema, SqlDatabase, SqlValue, SqliteDriver, StoreSchema,
};

// ============================================================================
// Test helpers
// ============================================================================

fn driver() -> SqliteDriver {
    SqliteDriver::open_in_memory().expect("open in-memory DB")
}

fn open(driver: &SqliteDriver, schema: Schema) -> SqlDatabase<SqliteDriver> {
    SqlDatabase::open(driver.clone(), schema, false).expect("open database")
}

fn seed_users(db: &SqlDatabase<SqliteDriver>, count: usize) {
    let trans = db.transaction();
    let store = trans.store("users").unwrap();
    let records: Vec<_> = (0..count)
        .map(|i| json!({"id": format!("u{i:03}"), "age": i, "city": format!("c{}", i % 3)}))
        .collect();
    store.put(&records).unwrap();
}

fn table_exists(db: &SqlDatabase<SqliteDriver>, name: &str) -> bool {
    let trans = db.transaction();
    let rows = trans
        .run_query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[SqlValue::Text(name.to_string())],
        )
        .unwrap();
    !rows.is_empty()
}

// ============================================================================
// Version bookkeeping
// ============================================================================

#[test]
fn reopening_same_version_preserves_data() {
    let driver = driver();
    let db = open(&driver, Schema::new(1).with_store(StoreSchema::new("users", "id")));
    seed_users(&db, 3);
    drop(db);

    let db = open(&driver, Schema::new(1).with_store(StoreSchema::new("users", "id")));
    let trans = db.transaction();
    assert_eq!(trans.store("users").unwrap().primary_key().count_all().unwrap(), 3);
}

#[test]
fn wipe_if_exists_clears_data_without_version_change() {
    let driver = driver();
    let schema = || Schema::new(1).with_store(StoreSchema::new("users", "id"));
    let db = open(&driver, schema());
    seed_users(&db, 3);
    drop(db);

    let db = SqlDatabase::open(driver.clone(), schema(), true).expect("open with wipe");
    let trans = db.transaction();
    assert_eq!(trans.store("users").unwrap().primary_key().count_all().unwrap(), 0);
}

#[test]
fn opening_older_schema_than_stored_wipes() {
    let driver = driver();
    let db = open(&driver, Schema::new(2).with_store(StoreSchema::new("users", "id")));
    seed_users(&db, 2);
    drop(db);

    let db = open(&driver, Schema::new(1).with_store(StoreSchema::new("users", "id")));
    let trans = db.transaction();
    assert_eq!(trans.store("users").unwrap().primary_key().count_all().unwrap(), 0);
}

#[test]
fn stored_version_below_last_usable_wipes() {
    let driver = driver();
    let db = open(&driver, Schema::new(1).with_store(StoreSchema::new("users", "id")));
    seed_users(&db, 2);
    drop(db);

    let schema = Schema::new(3)
        .last_usable_version(2)
        .with_store(StoreSchema::new("users", "id"));
    let db = open(&driver, schema);
    let trans = db.transaction();
    assert_eq!(trans.store("users").unwrap().primary_key().count_all().unwrap(), 0);
}

// ============================================================================
// Structural changes
// ============================================================================

#[test]
fn removed_store_is_dropped_on_upgrade() {
    let driver = driver();
    let db = open(
        &driver,
        Schema::new(1)
            .with_store(StoreSchema::new("users", "id"))
            .with_store(StoreSchema::new("legacy", "id")),
    );
    seed_users(&db, 1);
    assert!(table_exists(&db, "legacy"));
    drop(db);

    let db = open(&driver, Schema::new(2).with_store(StoreSchema::new("users", "id")));
    assert!(!table_exists(&db, "legacy"));
    let trans = db.transaction();
    assert!(trans.store("legacy").is_err());
    assert_eq!(trans.store("users").unwrap().primary_key().count_all().unwrap(), 1);
}

#[test]
fn new_backfilling_index_is_populated_from_existing_data() {
    let driver = driver();
    let db = open(&driver, Schema::new(1).with_store(StoreSchema::new("users", "id")));
    seed_users(&db, 5);
    drop(db);

    let db = open(
        &driver,
        Schema::new(2).with_store(
            StoreSchema::new("users", "id").with_index(IndexSchema::new("age", "age")),
        ),
    );
    let trans = db.transaction();
    let age = trans.store("users").unwrap().index("age").unwrap();
    assert_eq!(
        age.get_only(&Key::Number(3.0), QuerySortOrder::None, None, None).unwrap().len(),
        1
    );
    assert_eq!(age.count_all().unwrap(), 5);
}

#[test]
fn new_no_backfill_index_skips_existing_rows() {
    let driver = driver();
    let db = open(&driver, Schema::new(1).with_store(StoreSchema::new("users", "id")));
    seed_users(&db, 3);
    drop(db);

    let db = open(
        &driver,
        Schema::new(2).with_store(
            StoreSchema::new("users", "id")
                .with_index(IndexSchema::new("age", "age").no_backfill()),
        ),
    );
    let trans = db.transaction();
    let store = trans.store("users").unwrap();
    // Existing rows were not re-indexed...
    assert!(store
        .index("age")
        .unwrap()
        .get_only(&Key::Number(1.0), QuerySortOrder::None, None, None)
        .unwrap()
        .is_empty());
    // ...but data survived, and new writes are indexed.
    assert_eq!(store.primary_key().count_all().unwrap(), 3);
    store.put(&[json!({"id": "u999", "age": 99})]).unwrap();
    assert_eq!(
        store
            .index("age")
            .unwrap()
            .get_only(&Key::Number(99.0), QuerySortOrder::None, None, None)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn removed_column_index_preserves_data_and_surviving_indexes() {
    let driver = driver();
    let db = open(
        &driver,
        Schema::new(1).with_store(
            StoreSchema::new("users", "id")
                .with_index(IndexSchema::new("age", "age"))
                .with_index(IndexSchema::new("city", "city")),
        ),
    );
    seed_users(&db, 6);
    drop(db);

    let db = open(
        &driver,
        Schema::new(2).with_store(
            StoreSchema::new("users", "id").with_index(IndexSchema::new("age", "age")),
        ),
    );
    let trans = db.transaction();
    let store = trans.store("users").unwrap();
    assert_eq!(store.primary_key().count_all().unwrap(), 6);
    assert_eq!(
        store
            .index("age")
            .unwrap()
            .get_only(&Key::Number(4.0), QuerySortOrder::None, None, None)
            .unwrap()
            .len(),
        1
    );
    assert!(store.index("city").is_err());
}

#[test]
fn changed_index_definition_rebuilds_the_index() {
    let driver = driver();
    let db = open(
        &driver,
        Schema::new(1).with_store(
            StoreSchema::new("users", "id").with_index(IndexSchema::new("age", "age")),
        ),
    );
    seed_users(&db, 4);
    drop(db);

    // Same index name, now unique: metadata mismatch forces a full
    // migration which re-puts every record.
    let db = open(
        &driver,
        Schema::new(2).with_store(
            StoreSchema::new("users", "id")
                .with_index(IndexSchema::new("age", "age").unique()),
        ),
    );
    let trans = db.transaction();
    let store = trans.store("users").unwrap();
    assert_eq!(store.primary_key().count_all().unwrap(), 4);
    assert_eq!(store.index("age").unwrap().count_all().unwrap(), 4);
}

#[test]
fn multi_entry_side_table_survives_full_migration() {
    let driver = driver();
    let db = open(
        &driver,
        Schema::new(1).with_store(
            StoreSchema::new("docs", "id")
                .with_index(IndexSchema::new("tags", "tags").multi_entry()),
        ),
    );
    {
        let trans = db.transaction();
        let store = trans.store("docs").unwrap();
        store
            .put(&[
                json!({"id": "a", "tags": ["x", "y"], "n": 1}),
                json!({"id": "b", "tags": ["y"], "n": 2}),
            ])
            .unwrap();
    }
    drop(db);

    // Adding a backfilling index forces a full migration; the side table
    // must be rebuilt from the re-put records.
    let db = open(
        &driver,
        Schema::new(2).with_store(
            StoreSchema::new("docs", "id")
                .with_index(IndexSchema::new("tags", "tags").multi_entry())
                .with_index(IndexSchema::new("n", "n")),
        ),
    );
    let trans = db.transaction();
    let store = trans.store("docs").unwrap();
    let tags = store.index("tags").unwrap();
    assert_eq!(tags.get_only(&Key::from("y"), QuerySortOrder::None, None, None).unwrap().len(), 2);
    assert_eq!(
        store
            .index("n")
            .unwrap()
            .get_only(&Key::Number(2.0), QuerySortOrder::None, None, None)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn batched_data_migration_moves_every_record() {
    let driver = driver();
    let db = open(
        &driver,
        Schema::new(1)
            // A tiny batch target: 1_000_000 / 600_000 -> one record per batch.
            .with_store(StoreSchema::new("users", "id").estimated_obj_bytes(600_000)),
    );
    seed_users(&db, 5);
    drop(db);

    let db = open(
        &driver,
        Schema::new(2).with_store(
            StoreSchema::new("users", "id")
                .estimated_obj_bytes(600_000)
                .with_index(IndexSchema::new("age", "age")),
        ),
    );
    let trans = db.transaction();
    let store = trans.store("users").unwrap();
    assert_eq!(store.primary_key().count_all().unwrap(), 5);
    assert_eq!(store.index("age").unwrap().count_all().unwrap(), 5);
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn multi_entry_with_compound_key_path_is_rejected() {
    let schema = Schema::new(1).with_store(
        StoreSchema::new("docs", "id").with_index(
            IndexSchema::new("bad", ["a", "b"].as_slice()).multi_entry(),
        ),
    );
    let err = SqlDatabase::open(driver(), schema, false).err().unwrap();
    assert!(err.to_string().contains("migration"), "{err}");
}

#[test]
fn duplicate_store_names_are_rejected() {
    let schema = Schema::new(1)
        .with_store(StoreSchema::new("users", "id"))
        .with_store(StoreSchema::new("users", "id"));
    let err = SqlDatabase::open(driver(), schema, false).err().unwrap();
    assert!(err.to_string().contains("Duplicate"), "{err}");
}
