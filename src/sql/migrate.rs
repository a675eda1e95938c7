//! Schema migration engine.
//!
//! On open, the persisted schema version and per-index metadata snapshots
//! are compared against the declared schema, the engine catalog is
//! introspected, and each store is assigned the cheapest action that
//! reconciles its physical shape with the declaration:
//!
//!   fresh create > full data migration > in-place column copy >
//!   additive columns > reindex only > nothing
//!
//! A full migration renames the table aside, recreates it with the declared
//! shape, and re-puts every record in size-bounded batches through the
//! store access layer so every index representation is repopulated.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SchemaError, StorageError};
use crate::schema::{index_identifier, IndexMetadata, IndexSchema, StoreSchema};
use crate::sql::driver::{SqlDriver, SqlValue};
use crate::sql::executor::SqlTransaction;
use crate::sql::{
    index_column, placeholders, DATA_COLUMN, METADATA_TABLE, PK_COLUMN, SCHEMA_VERSION_KEY,
    SIDE_KEY_COLUMN, SIDE_REFPK_COLUMN,
};

/// Upper bound on the payload bytes re-put per batch during a full data
/// migration.
const MIGRATION_MAX_BYTE_TARGET: usize = 1_000_000;
/// Assumed record size when the store schema does not estimate one.
const SIZE_ESTIMATE_DEFAULT: usize = 200;

// ============================================================================
// Metadata table
// ============================================================================

pub(crate) fn ensure_metadata_table<D: SqlDriver>(trans: &SqlTransaction<D>) -> Result<()> {
    trans.non_query(
        &format!("CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (name TEXT PRIMARY KEY, value TEXT)"),
        &[],
    )
}

pub(crate) fn get_db_version<D: SqlDriver>(trans: &SqlTransaction<D>) -> Result<u32> {
    ensure_metadata_table(trans)?;
    let rows = trans.run_query(
        &format!("SELECT value FROM {METADATA_TABLE} WHERE name = ?"),
        &[SqlValue::Text(SCHEMA_VERSION_KEY.to_string())],
    )?;
    Ok(rows
        .first()
        .and_then(|row| row.first())
        .and_then(SqlValue::as_text)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

pub(crate) fn put_db_version<D: SqlDriver>(trans: &SqlTransaction<D>, version: u32) -> Result<()> {
    ensure_metadata_table(trans)?;
    trans.non_query(
        &format!("INSERT OR REPLACE INTO {METADATA_TABLE} (name, value) VALUES (?, ?)"),
        &[
            SqlValue::Text(SCHEMA_VERSION_KEY.to_string()),
            SqlValue::Text(version.to_string()),
        ],
    )
}

/// Every persisted index snapshot. Rows that fail to decode are skipped —
/// a snapshot written by a newer build must not brick the open path.
fn read_index_metadata<D: SqlDriver>(trans: &SqlTransaction<D>) -> Result<Vec<IndexMetadata>> {
    let rows = trans.run_query(
        &format!("SELECT name, value FROM {METADATA_TABLE} WHERE name != ?"),
        &[SqlValue::Text(SCHEMA_VERSION_KEY.to_string())],
    )?;
    let mut metas = Vec::new();
    for row in rows {
        let Some(value) = row.get(1).and_then(SqlValue::as_text) else {
            continue;
        };
        match serde_json::from_str::<IndexMetadata>(value) {
            Ok(meta) => metas.push(meta),
            Err(e) => {
                let name = row.first().and_then(SqlValue::as_text).unwrap_or("?");
                tracing::warn!(name, error = %e, "skipping undecodable index metadata row");
            }
        }
    }
    Ok(metas)
}

fn store_index_metadata<D: SqlDriver>(
    trans: &SqlTransaction<D>,
    meta: &IndexMetadata,
) -> Result<()> {
    let value = serde_json::to_string(meta).map_err(|e| StorageError::Corruption {
        context: meta.key.clone(),
        message: e.to_string(),
    })?;
    trans.non_query(
        &format!("INSERT OR REPLACE INTO {METADATA_TABLE} (name, value) VALUES (?, ?)"),
        &[SqlValue::Text(meta.key.clone()), SqlValue::Text(value)],
    )
}

fn delete_metadata<D: SqlDriver>(trans: &SqlTransaction<D>, keys: &[String]) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let params: Vec<SqlValue> = keys.iter().map(|k| SqlValue::Text(k.clone())).collect();
    trans.non_query(
        &format!(
            "DELETE FROM {METADATA_TABLE} WHERE name IN ({})",
            placeholders(params.len())
        ),
        &params,
    )
}

// ============================================================================
// Catalog introspection
// ============================================================================

/// Snapshot of the engine catalog: user tables, their columns as parsed from
/// the persisted CREATE statements, SQL index names per table, and the
/// side-table suffixes grouped under each store table.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub(crate) tables: Vec<String>,
    pub(crate) index_names: HashMap<String, Vec<String>>,
    pub(crate) index_tables: HashMap<String, Vec<String>>,
    pub(crate) table_columns: HashMap<String, Vec<String>>,
}

impl Catalog {
    pub(crate) fn table_exists(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t == name)
    }

    pub(crate) fn column_exists(&self, table: &str, column: &str) -> bool {
        self.table_columns
            .get(table)
            .is_some_and(|cols| cols.iter().any(|c| c == column))
    }

    fn sql_index_exists(&self, table: &str, index_name: &str) -> bool {
        self.index_names
            .get(table)
            .is_some_and(|names| names.iter().any(|n| n == index_name))
    }
}

fn table_columns_from_sql(create_sql: &str) -> Vec<String> {
    static COLUMNS: OnceLock<Regex> = OnceLock::new();
    let re = COLUMNS.get_or_init(|| {
        Regex::new(r"CREATE\s+TABLE\s+\w+\s*\(([^)]+)\)").expect("column regex is valid")
    });
    match re.captures(create_sql) {
        Some(caps) => caps[1]
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

/// True for shadow tables a native full-text module maintains alongside a
/// virtual table.
fn is_fts_shadow_table(name: &str) -> bool {
    ["_content", "_segments", "_segdir", "_docsize", "_stat"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

pub(crate) fn read_catalog<D: SqlDriver>(trans: &SqlTransaction<D>) -> Result<Catalog> {
    let rows = trans.run_query("SELECT type, name, tbl_name, sql FROM sqlite_master", &[])?;
    let mut catalog = Catalog::default();
    for row in rows {
        let entry_type = row.first().and_then(SqlValue::as_text).unwrap_or("");
        let name = row.get(1).and_then(SqlValue::as_text).unwrap_or("");
        let table_name = row.get(2).and_then(SqlValue::as_text).unwrap_or("");
        if table_name == METADATA_TABLE
            || table_name.starts_with("sqlite_")
            || is_fts_shadow_table(table_name)
        {
            continue;
        }
        match entry_type {
            "table" => {
                catalog.tables.push(name.to_string());
                if let Some(sql) = row.get(3).and_then(SqlValue::as_text) {
                    catalog
                        .table_columns
                        .insert(name.to_string(), table_columns_from_sql(sql));
                }
                // A `store_index` name files the suffix under its store;
                // an unsplit name registers the store itself.
                match name.split_once('_') {
                    Some((store, suffix)) => catalog
                        .index_tables
                        .entry(store.to_string())
                        .or_default()
                        .push(suffix.to_string()),
                    None => {
                        catalog.index_names.entry(name.to_string()).or_default();
                        catalog.index_tables.entry(name.to_string()).or_default();
                    }
                }
            }
            "index" => {
                if name.starts_with("sqlite_autoindex_") {
                    continue;
                }
                catalog
                    .index_names
                    .entry(table_name.to_string())
                    .or_default()
                    .push(name.to_string());
            }
            _ => {}
        }
    }
    Ok(catalog)
}

// ============================================================================
// Per-store action planning
// ============================================================================

/// The reconciliation a store needs, cheapest sufficient action wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreAction {
    /// No table yet: create it and all indexes directly.
    CreateFresh,
    /// Rebuild the table and re-put every record through the access layer.
    FullMigrate,
    /// Rebuild the table shape but copy surviving columns with one
    /// INSERT..SELECT; no per-record work.
    CopyColumns,
    /// Only additive no-backfill indexes: ALTER TABLE ADD COLUMN suffices.
    /// `also_reindex` re-creates SQL index objects found missing.
    AddColumns { also_reindex: bool },
    /// Columns are in place but a SQL index object is missing.
    ReindexOnly,
    NoAction,
}

pub(crate) fn plan_store_action(
    store: &StoreSchema,
    catalog: &Catalog,
    metas: &[IndexMetadata],
    supports_full_text: bool,
) -> StoreAction {
    if !catalog.table_exists(&store.name) {
        return StoreAction::CreateFresh;
    }

    let meta_by_key: HashMap<&str, &IndexMetadata> = metas
        .iter()
        .filter(|m| m.store_name == store.name)
        .map(|m| (m.key.as_str(), m))
        .collect();
    let declared: HashSet<String> = store
        .indexes
        .iter()
        .map(|i| index_identifier(store, i))
        .collect();

    let needs_full = store.indexes.iter().any(|index| {
        let identifier = index_identifier(store, index);
        let Some(meta) = meta_by_key.get(identifier.as_str()) else {
            // Unknown index: a backfilling one forces a data migration, a
            // no-backfill one can be added in place.
            return !index.do_not_backfill;
        };
        if meta.index != *index {
            return true;
        }
        // The snapshot matches; verify the physical backing is present.
        if index.uses_side_table(supports_full_text) {
            !catalog.table_exists(&identifier)
        } else {
            !catalog.column_exists(&store.name, &index_column(&index.name))
        }
    });
    if needs_full {
        return StoreAction::FullMigrate;
    }

    let removed_column_metas = meta_by_key
        .values()
        .any(|m| !declared.contains(&m.key) && !m.index.uses_side_table(supports_full_text));
    if removed_column_metas {
        return StoreAction::CopyColumns;
    }

    let some_indexes_missing = store.indexes.iter().any(|index| {
        !index.uses_side_table(supports_full_text)
            && catalog.column_exists(&store.name, &index_column(&index.name))
            && !catalog.sql_index_exists(&store.name, &index_identifier(store, index))
    });

    let has_new_no_backfill = store.indexes.iter().any(|index| {
        !meta_by_key.contains_key(index_identifier(store, index).as_str()) && index.do_not_backfill
    });
    if has_new_no_backfill {
        return StoreAction::AddColumns {
            also_reindex: some_indexes_missing,
        };
    }
    if some_indexes_missing {
        return StoreAction::ReindexOnly;
    }
    StoreAction::NoAction
}

// ============================================================================
// DDL builders
// ============================================================================

fn column_backed<'a>(
    store: &'a StoreSchema,
    supports_full_text: bool,
) -> impl Iterator<Item = &'a IndexSchema> {
    store
        .indexes
        .iter()
        .filter(move |i| !i.uses_side_table(supports_full_text))
}

fn create_store_table<D: SqlDriver>(
    trans: &SqlTransaction<D>,
    store: &StoreSchema,
) -> Result<()> {
    let mut fields = vec![
        format!("{PK_COLUMN} TEXT PRIMARY KEY"),
        format!("{DATA_COLUMN} TEXT"),
    ];
    fields.extend(
        column_backed(store, trans.supports_full_text())
            .map(|i| format!("{} TEXT", index_column(&i.name))),
    );
    trans.non_query(
        &format!("CREATE TABLE {} ({})", store.name, fields.join(", ")),
        &[],
    )
}

/// Create the physical backing for each index and persist its metadata
/// snapshot.
fn make_indexes<D: SqlDriver>(
    trans: &SqlTransaction<D>,
    store: &StoreSchema,
    indexes: &[&IndexSchema],
) -> Result<()> {
    let supports_full_text = trans.supports_full_text();
    for index in indexes {
        let identifier = index_identifier(store, index);
        if index.multi_entry && index.key_path.is_compound() {
            return Err(SchemaError::MultiEntryCompoundKey {
                store: store.name.clone(),
                index: index.name.clone(),
            }
            .into());
        }
        let unique = if index.unique { "UNIQUE " } else { "" };
        if index.full_text && supports_full_text {
            trans.non_query(
                &format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS {identifier} \
                     USING fts4({SIDE_KEY_COLUMN} TEXT, {SIDE_REFPK_COLUMN} TEXT)"
                ),
                &[],
            )?;
        } else if index.multi_entry {
            let data_col = if index.include_data_in_index {
                format!(", {DATA_COLUMN} TEXT")
            } else {
                String::new()
            };
            let data_in_pi = if index.include_data_in_index {
                format!(", {DATA_COLUMN}")
            } else {
                String::new()
            };
            trans.non_query(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {identifier} \
                     ({SIDE_KEY_COLUMN} TEXT, {SIDE_REFPK_COLUMN} TEXT{data_col})"
                ),
                &[],
            )?;
            trans.non_query(
                &format!(
                    "CREATE {unique}INDEX IF NOT EXISTS {identifier}_pi ON {identifier} \
                     ({SIDE_KEY_COLUMN}, {SIDE_REFPK_COLUMN}{data_in_pi})"
                ),
                &[],
            )?;
        } else {
            let data_in_index = if index.include_data_in_index {
                format!(", {DATA_COLUMN}")
            } else {
                String::new()
            };
            trans.non_query(
                &format!(
                    "CREATE {unique}INDEX IF NOT EXISTS {identifier} ON {} \
                     ({}{data_in_index})",
                    store.name,
                    index_column(&index.name)
                ),
                &[],
            )?;
        }
        store_index_metadata(
            trans,
            &IndexMetadata {
                key: identifier,
                store_name: store.name.clone(),
                index: (*index).clone(),
            },
        )?;
    }
    Ok(())
}

// ============================================================================
// Upgrade driver
// ============================================================================

/// Reconcile the whole database with the declared schema. `old_version` is
/// the persisted version before this open; `wipe_anyway` forces a from-
/// scratch rebuild regardless of version deltas.
pub(crate) fn upgrade<D: SqlDriver>(
    trans: &SqlTransaction<D>,
    old_version: u32,
    wipe_anyway: bool,
) -> Result<()> {
    ensure_metadata_table(trans)?;
    let mut metas = read_index_metadata(trans)?;
    let mut catalog = read_catalog(trans)?;
    let schema = trans.schema();

    let below_usable = schema
        .last_usable_version
        .is_some_and(|usable| old_version < usable);
    if wipe_anyway || below_usable {
        if !wipe_anyway {
            tracing::warn!(old_version, "stored version below last usable, clearing all tables");
        }
        for table in &catalog.tables {
            trans.non_query(&format!("DROP TABLE {table}"), &[])?;
        }
        let all_keys: Vec<String> = metas.iter().map(|m| m.key.clone()).collect();
        delete_metadata(trans, &all_keys)?;
        metas.clear();
        catalog = Catalog::default();
    } else {
        // Drop tables the schema no longer declares, and their snapshots.
        let mut needed: HashSet<String> = HashSet::new();
        for store in &schema.stores {
            needed.insert(store.name.clone());
            for index in &store.indexes {
                if index.uses_side_table(trans.supports_full_text()) {
                    needed.insert(index_identifier(store, index));
                }
            }
        }
        let (kept, dropped): (Vec<String>, Vec<String>) = catalog
            .tables
            .iter()
            .cloned()
            .partition(|name| needed.contains(name));
        for table in &dropped {
            tracing::debug!(table, "dropping undeclared table");
            trans.non_query(&format!("DROP TABLE {table}"), &[])?;
            let doomed: Vec<String> = metas
                .iter()
                .filter(|m| m.store_name == *table)
                .map(|m| m.key.clone())
                .collect();
            delete_metadata(trans, &doomed)?;
            metas.retain(|m| !doomed.contains(&m.key));
        }
        catalog.tables = kept;
    }

    for store in &schema.stores {
        migrate_store(trans, store, &catalog, &metas)?;
    }
    Ok(())
}

fn migrate_store<D: SqlDriver>(
    trans: &SqlTransaction<D>,
    store: &StoreSchema,
    catalog: &Catalog,
    metas: &[IndexMetadata],
) -> Result<()> {
    let supports_full_text = trans.supports_full_text();
    let action = plan_store_action(store, catalog, metas, supports_full_text);
    tracing::debug!(store = %store.name, ?action, "store migration action");

    let declared: HashSet<String> = store
        .indexes
        .iter()
        .map(|i| index_identifier(store, i))
        .collect();
    let removed_metas: Vec<&IndexMetadata> = metas
        .iter()
        .filter(|m| m.store_name == store.name && !declared.contains(&m.key))
        .collect();
    let removed_keys: Vec<String> = removed_metas.iter().map(|m| m.key.clone()).collect();
    let all_indexes: Vec<&IndexSchema> = store.indexes.iter().collect();

    // Drops the metadata of every removed index, plus the given side tables.
    let drop_removed = |side_tables_to_drop: &[String]| -> Result<()> {
        delete_metadata(trans, &removed_keys)?;
        for table in side_tables_to_drop {
            trans.non_query(&format!("DROP TABLE IF EXISTS {table}"), &[])?;
        }
        Ok(())
    };
    let removed_side_tables: Vec<String> = removed_metas
        .iter()
        .filter(|m| m.index.uses_side_table(supports_full_text))
        .map(|m| m.key.clone())
        .collect();
    let drop_column_indexes = || -> Result<()> {
        if let Some(names) = catalog.index_names.get(&store.name) {
            for name in names {
                trans.non_query(&format!("DROP INDEX {name}"), &[])?;
            }
        }
        Ok(())
    };
    let temp_table = format!("temp_{}", store.name);
    let rename_aside = || -> Result<()> {
        trans.non_query(
            &format!("ALTER TABLE {} RENAME TO {temp_table}", store.name),
            &[],
        )
    };

    match action {
        StoreAction::CreateFresh => {
            create_store_table(trans, store)?;
            make_indexes(trans, store, &all_indexes)?;
        }
        StoreAction::FullMigrate => {
            // Every side table of this store is rebuilt, not just removed
            // ones.
            let all_side_tables: Vec<String> = catalog
                .index_tables
                .get(&store.name)
                .map(|suffixes| {
                    suffixes
                        .iter()
                        .map(|s| format!("{}_{s}", store.name))
                        .collect()
                })
                .unwrap_or_default();
            drop_removed(&all_side_tables)?;
            drop_column_indexes()?;
            rename_aside()?;
            create_store_table(trans, store)?;
            make_indexes(trans, store, &all_indexes)?;
            backfill_from_temp(trans, store, &temp_table)?;
            trans.non_query(&format!("DROP TABLE {temp_table}"), &[])?;
        }
        StoreAction::CopyColumns => {
            drop_removed(&removed_side_tables)?;
            drop_column_indexes()?;
            rename_aside()?;
            create_store_table(trans, store)?;
            make_indexes(trans, store, &all_indexes)?;
            // Only columns that existed before survive the copy; anything
            // else was already ruled out by the planner.
            let meta_keys: HashSet<&str> = metas
                .iter()
                .filter(|m| m.store_name == store.name)
                .map(|m| m.key.as_str())
                .collect();
            let mut columns = vec![PK_COLUMN.to_string(), DATA_COLUMN.to_string()];
            columns.extend(
                column_backed(store, supports_full_text)
                    .filter(|i| meta_keys.contains(index_identifier(store, i).as_str()))
                    .map(|i| index_column(&i.name)),
            );
            let column_list = columns.join(", ");
            trans.non_query(
                &format!(
                    "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {temp_table}",
                    store.name
                ),
                &[],
            )?;
            trans.non_query(&format!("DROP TABLE {temp_table}"), &[])?;
        }
        StoreAction::AddColumns { also_reindex } => {
            drop_removed(&removed_side_tables)?;
            let new_no_backfill: Vec<&IndexSchema> = store
                .indexes
                .iter()
                .filter(|i| {
                    i.do_not_backfill
                        && !metas
                            .iter()
                            .any(|m| m.key == index_identifier(store, i))
                })
                .collect();
            for index in new_no_backfill
                .iter()
                .filter(|i| !i.uses_side_table(supports_full_text))
            {
                trans.non_query(
                    &format!(
                        "ALTER TABLE {} ADD COLUMN {} TEXT",
                        store.name,
                        index_column(&index.name)
                    ),
                    &[],
                )?;
            }
            make_indexes(trans, store, &new_no_backfill)?;
            if also_reindex {
                make_indexes(trans, store, &all_indexes)?;
            }
        }
        StoreAction::ReindexOnly => {
            drop_removed(&removed_side_tables)?;
            make_indexes(trans, store, &all_indexes)?;
        }
        StoreAction::NoAction => {
            // Undeclared side tables were already dropped in the global
            // pass; only stale snapshots can remain.
            drop_removed(&[])?;
        }
    }
    Ok(())
}

/// Re-put every record from the renamed-aside table through the store
/// access layer, in batches sized to a byte target.
fn backfill_from_temp<D: SqlDriver>(
    trans: &SqlTransaction<D>,
    store_schema: &StoreSchema,
    temp_table: &str,
) -> Result<()> {
    let estimated = store_schema
        .estimated_obj_bytes
        .unwrap_or(SIZE_ESTIMATE_DEFAULT);
    let batch_size = std::cmp::max(1, MIGRATION_MAX_BYTE_TARGET / estimated);
    let store = trans.store(&store_schema.name)?;
    let mut offset = 0usize;
    loop {
        let records = trans.get_results_from_query(
            &format!("SELECT {DATA_COLUMN} FROM {temp_table} LIMIT {batch_size} OFFSET {offset}"),
            &[],
        )?;
        let fetched = records.len();
        store.put(&records)?;
        if fetched < batch_size {
            return Ok(());
        }
        offset += batch_size;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(store: &StoreSchema, supports_full_text: bool) -> Catalog {
        let mut catalog = Catalog::default();
        catalog.tables.push(store.name.clone());
        let mut columns = vec![PK_COLUMN.to_string(), DATA_COLUMN.to_string()];
        let mut sql_indexes = Vec::new();
        for index in &store.indexes {
            let identifier = index_identifier(store, index);
            if index.uses_side_table(supports_full_text) {
                catalog.tables.push(identifier.clone());
                catalog
                    .index_tables
                    .entry(store.name.clone())
                    .or_default()
                    .push(index.name.clone());
            } else {
                columns.push(index_column(&index.name));
                sql_indexes.push(identifier);
            }
        }
        catalog.table_columns.insert(store.name.clone(), columns);
        catalog.index_names.insert(store.name.clone(), sql_indexes);
        catalog
    }

    fn metas_for(store: &StoreSchema) -> Vec<IndexMetadata> {
        store
            .indexes
            .iter()
            .map(|index| IndexMetadata {
                key: index_identifier(store, index),
                store_name: store.name.clone(),
                index: index.clone(),
            })
            .collect()
    }

    #[test]
    fn missing_table_creates_fresh() {
        let store = StoreSchema::new("s", "id");
        let action = plan_store_action(&store, &Catalog::default(), &[], true);
        assert_eq!(action, StoreAction::CreateFresh);
    }

    #[test]
    fn matching_schema_needs_nothing() {
        let store = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        let catalog = catalog_with(&store, true);
        let metas = metas_for(&store);
        assert_eq!(
            plan_store_action(&store, &catalog, &metas, true),
            StoreAction::NoAction
        );
    }

    #[test]
    fn new_backfilling_index_forces_full_migration() {
        let old = StoreSchema::new("s", "id");
        let catalog = catalog_with(&old, true);
        let new = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        assert_eq!(
            plan_store_action(&new, &catalog, &[], true),
            StoreAction::FullMigrate
        );
    }

    #[test]
    fn new_no_backfill_index_adds_columns() {
        let old = StoreSchema::new("s", "id");
        let catalog = catalog_with(&old, true);
        let new = StoreSchema::new("s", "id")
            .with_index(IndexSchema::new("age", "age").no_backfill());
        assert_eq!(
            plan_store_action(&new, &catalog, &[], true),
            StoreAction::AddColumns {
                also_reindex: false
            }
        );
    }

    #[test]
    fn changed_index_definition_forces_full_migration() {
        let old = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        let catalog = catalog_with(&old, true);
        let metas = metas_for(&old);
        let new =
            StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age").unique());
        assert_eq!(
            plan_store_action(&new, &catalog, &metas, true),
            StoreAction::FullMigrate
        );
    }

    #[test]
    fn removed_column_index_copies_columns() {
        let old = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        let catalog = catalog_with(&old, true);
        let metas = metas_for(&old);
        let new = StoreSchema::new("s", "id");
        assert_eq!(
            plan_store_action(&new, &catalog, &metas, true),
            StoreAction::CopyColumns
        );
    }

    #[test]
    fn removed_column_index_beats_new_no_backfill() {
        let old = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        let catalog = catalog_with(&old, true);
        let metas = metas_for(&old);
        let new = StoreSchema::new("s", "id")
            .with_index(IndexSchema::new("city", "city").no_backfill());
        assert_eq!(
            plan_store_action(&new, &catalog, &metas, true),
            StoreAction::CopyColumns
        );
    }

    #[test]
    fn missing_sql_index_object_reindexes_only() {
        let store = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        let mut catalog = catalog_with(&store, true);
        // Column is there but the index object was dropped out-of-band.
        catalog.index_names.insert("s".to_string(), Vec::new());
        let metas = metas_for(&store);
        assert_eq!(
            plan_store_action(&store, &catalog, &metas, true),
            StoreAction::ReindexOnly
        );
    }

    #[test]
    fn missing_side_table_forces_full_migration() {
        let store =
            StoreSchema::new("s", "id").with_index(IndexSchema::new("tags", "tags").multi_entry());
        let mut catalog = catalog_with(&store, true);
        catalog.tables.retain(|t| t == "s");
        let metas = metas_for(&store);
        assert_eq!(
            plan_store_action(&store, &catalog, &metas, true),
            StoreAction::FullMigrate
        );
    }

    #[test]
    fn missing_index_column_forces_full_migration() {
        let store = StoreSchema::new("s", "id").with_index(IndexSchema::new("age", "age"));
        let mut catalog = catalog_with(&store, true);
        catalog.table_columns.insert(
            "s".to_string(),
            vec![PK_COLUMN.to_string(), DATA_COLUMN.to_string()],
        );
        let metas = metas_for(&store);
        assert_eq!(
            plan_store_action(&store, &catalog, &metas, true),
            StoreAction::FullMigrate
        );
    }

    #[test]
    fn fts_index_backing_depends_on_engine_capability() {
        let store =
            StoreSchema::new("s", "id").with_index(IndexSchema::new("body", "body").full_text());
        // Materialized with native FTS; still opened with native FTS.
        let catalog = catalog_with(&store, true);
        let metas = metas_for(&store);
        assert_eq!(
            plan_store_action(&store, &catalog, &metas, true),
            StoreAction::NoAction
        );
        // Same store introspected by an engine without native FTS: the
        // expected backing is now a column, which is absent.
        assert_eq!(
            plan_store_action(&store, &catalog, &metas, false),
            StoreAction::FullMigrate
        );
    }

    #[test]
    fn create_table_sql_column_parse() {
        let cols =
            table_columns_from_sql("CREATE TABLE s (nsp_pk TEXT PRIMARY KEY, nsp_data TEXT)");
        assert_eq!(cols, vec!["nsp_pk", "nsp_data"]);
        assert!(table_columns_from_sql("CREATE VIRTUAL TABLE x USING fts4(a)").is_empty());
    }

    #[test]
    fn fts_shadow_tables_are_recognized() {
        assert!(is_fts_shadow_table("s_body_content"));
        assert!(is_fts_shadow_table("s_body_segdir"));
        assert!(!is_fts_shadow_table("s_body"));
    }
}
