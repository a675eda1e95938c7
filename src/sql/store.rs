//! Store access layer: get/getMultiple/put/remove/clear for one store,
//! keeping every side table in sync with the primary table.
//!
//! `put` is the single source of truth for how a record maps onto every
//! index representation — the migration engine reuses it to repopulate
//! indexes during a full data migration.

use serde_json::Value;

use crate::error::Result;
use crate::keys::{
    encode_key_for_keypath, encode_key_for_path, form_encoded_list, key_from_value,
    try_encode_key_for_keypath, value_at_path, Key,
};
use crate::schema::{IndexSchema, KeyPath, StoreSchema};
use crate::sql::driver::{SqlDriver, SqlValue};
use crate::sql::executor::SqlTransaction;
use crate::sql::index::SqlStoreIndex;
use crate::sql::{
    index_column, placeholders, DATA_COLUMN, FAKE_FTS_JOIN_TOKEN, PK_COLUMN, SIDE_KEY_COLUMN,
    SIDE_REFPK_COLUMN,
};
use crate::{error::StorageError, fulltext};

pub struct SqlStore<'t, D: SqlDriver> {
    trans: &'t SqlTransaction<D>,
    schema: &'t StoreSchema,
}

impl<'t, D: SqlDriver> SqlStore<'t, D> {
    pub(crate) fn new(trans: &'t SqlTransaction<D>, schema: &'t StoreSchema) -> Self {
        Self { trans, schema }
    }

    pub fn schema(&self) -> &StoreSchema {
        self.schema
    }

    fn side_table_indexes(&self) -> Vec<&'t IndexSchema> {
        let supports_fts = self.trans.supports_full_text();
        self.schema
            .indexes
            .iter()
            .filter(|i| i.uses_side_table(supports_fts))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        let encoded = encode_key_for_path(key, &self.schema.primary_key_path)?;
        self.trans.get_result_from_query(
            &format!(
                "SELECT {DATA_COLUMN} FROM {} WHERE {PK_COLUMN} = ?",
                self.schema.name
            ),
            &[SqlValue::Text(encoded)],
        )
    }

    pub fn get_multiple(&self, keys: &[Key]) -> Result<Vec<Value>> {
        let encoded = form_encoded_list(keys, &self.schema.primary_key_path)?;
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<SqlValue> = encoded.into_iter().map(SqlValue::Text).collect();
        self.trans.get_results_from_query(
            &format!(
                "SELECT {DATA_COLUMN} FROM {} WHERE {PK_COLUMN} IN ({})",
                self.schema.name,
                placeholders(params.len())
            ),
            &params,
        )
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert-by-primary-key. Column-backed rows go out as batched
    /// INSERT OR REPLACE statements paged under the engine's parameter
    /// ceiling; side tables are maintained delete-then-insert, never
    /// update-in-place, because a record may gain or lose entries.
    pub fn put(&self, records: &[Value]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let supports_fts = self.trans.supports_full_text();
        let column_indexes: Vec<&IndexSchema> = self
            .schema
            .indexes
            .iter()
            .filter(|i| !i.uses_side_table(supports_fts))
            .collect();

        let mut fields = vec![PK_COLUMN.to_string(), DATA_COLUMN.to_string()];
        fields.extend(column_indexes.iter().map(|i| index_column(&i.name)));

        // Encode everything up front so a key failure never touches the
        // engine with a partial batch.
        let mut args: Vec<SqlValue> = Vec::with_capacity(records.len() * fields.len());
        let mut encoded_pks: Vec<String> = Vec::with_capacity(records.len());
        let mut payloads: Vec<String> = Vec::with_capacity(records.len());
        for record in records {
            let pk = encode_key_for_keypath(record, &self.schema.primary_key_path)?;
            let payload = serde_json::to_string(record).map_err(|e| StorageError::Corruption {
                context: self.schema.name.clone(),
                message: e.to_string(),
            })?;
            args.push(SqlValue::Text(pk.clone()));
            args.push(SqlValue::Text(payload.clone()));
            for index in &column_indexes {
                if index.full_text && !supports_fts {
                    let terms = fulltext::terms_for_record(&index.key_path, record);
                    args.push(SqlValue::Text(format!(
                        "{FAKE_FTS_JOIN_TOKEN}{}",
                        terms.join(FAKE_FTS_JOIN_TOKEN)
                    )));
                } else {
                    match try_encode_key_for_keypath(record, &index.key_path)? {
                        Some(encoded) => args.push(SqlValue::Text(encoded)),
                        None => args.push(SqlValue::Null),
                    }
                }
            }
            encoded_pks.push(pk);
            payloads.push(payload);
        }

        let records_per_statement =
            std::cmp::max(1, self.trans.max_variables() / fields.len());
        let row_placeholder = format!("({})", placeholders(fields.len()));
        self.trans.atomically(|| {
            for chunk in args.chunks(records_per_statement * fields.len()) {
                let rows_in_chunk = chunk.len() / fields.len();
                let sql = format!(
                    "INSERT OR REPLACE INTO {} ({}) VALUES {}",
                    self.schema.name,
                    fields.join(","),
                    vec![row_placeholder.as_str(); rows_in_chunk].join(",")
                );
                self.trans.non_query(&sql, chunk)?;
            }

            for index in self.side_table_indexes() {
                self.refresh_side_table(index, records, &encoded_pks, &payloads)?;
            }
            Ok(())
        })
    }

    /// Delete-then-insert all side-table rows of `index` for the given
    /// records.
    fn refresh_side_table(
        &self,
        index: &IndexSchema,
        records: &[Value],
        encoded_pks: &[String],
        payloads: &[String],
    ) -> Result<()> {
        let table = format!("{}_{}", self.schema.name, index.name);
        let max_vars = std::cmp::max(1, self.trans.max_variables());

        for chunk in encoded_pks.chunks(max_vars) {
            let params: Vec<SqlValue> =
                chunk.iter().map(|k| SqlValue::Text(k.clone())).collect();
            self.trans.non_query(
                &format!(
                    "DELETE FROM {table} WHERE {SIDE_REFPK_COLUMN} IN ({})",
                    placeholders(params.len())
                ),
                &params,
            )?;
        }

        let include_data = index.include_data_in_index && !index.full_text;
        let columns_per_row = if include_data { 3 } else { 2 };
        let mut rows: Vec<SqlValue> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            for encoded_key in self.side_table_keys(index, record)? {
                rows.push(SqlValue::Text(encoded_key));
                rows.push(SqlValue::Text(encoded_pks[i].clone()));
                if include_data {
                    rows.push(SqlValue::Text(payloads[i].clone()));
                }
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let column_list = if include_data {
            format!("{SIDE_KEY_COLUMN}, {SIDE_REFPK_COLUMN}, {DATA_COLUMN}")
        } else {
            format!("{SIDE_KEY_COLUMN}, {SIDE_REFPK_COLUMN}")
        };
        let rows_per_statement = std::cmp::max(1, max_vars / columns_per_row);
        let row_placeholder = format!("({})", placeholders(columns_per_row));
        for chunk in rows.chunks(rows_per_statement * columns_per_row) {
            let rows_in_chunk = chunk.len() / columns_per_row;
            let sql = format!(
                "INSERT INTO {table} ({column_list}) VALUES {}",
                vec![row_placeholder.as_str(); rows_in_chunk].join(",")
            );
            self.trans.non_query(&sql, chunk)?;
        }
        Ok(())
    }

    /// The side-table key strings one record contributes to `index`: one
    /// space-joined term bag for native full text, or one encoded key per
    /// array element for multi-entry. Absent or non-array multi-entry
    /// source values contribute zero rows.
    fn side_table_keys(&self, index: &IndexSchema, record: &Value) -> Result<Vec<String>> {
        if index.full_text {
            let terms = fulltext::terms_for_record(&index.key_path, record);
            return Ok(vec![terms.join(" ")]);
        }
        let path = match &index.key_path {
            KeyPath::Single(p) => p.as_str(),
            // Rejected by the migration engine before any table exists.
            KeyPath::Compound(_) => return Ok(Vec::new()),
        };
        match value_at_path(record, path) {
            Some(Value::Array(items)) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(crate::keys::encode_key(&key_from_value(item)?)?);
                }
                Ok(keys)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Remove records by primary key, batching so that neither the encoded
    /// key length plus per-key overhead exceeds the statement-length ceiling
    /// nor the key count exceeds the parameter ceiling.
    pub fn remove(&self, keys: &[Key]) -> Result<()> {
        let encoded = form_encoded_list(keys, &self.schema.primary_key_path)?;
        if encoded.is_empty() {
            return Ok(());
        }

        let max_vars = std::cmp::max(1, self.trans.max_variables());
        let max_len = self.trans.max_sql_length_bytes().saturating_sub(200);
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut batch_len = 0usize;
        for key in encoded {
            batch_len += key.len() + 2;
            current.push(key);
            if batch_len > max_len || current.len() >= max_vars {
                batches.push(std::mem::take(&mut current));
                batch_len = 0;
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }

        let side_indexes = self.side_table_indexes();
        self.trans.atomically(|| {
            for batch in &batches {
                let ph = placeholders(batch.len());
                let params: Vec<SqlValue> =
                    batch.iter().map(|k| SqlValue::Text(k.clone())).collect();
                for index in &side_indexes {
                    self.trans.non_query(
                        &format!(
                            "DELETE FROM {}_{} WHERE {SIDE_REFPK_COLUMN} IN ({ph})",
                            self.schema.name, index.name
                        ),
                        &params,
                    )?;
                }
                self.trans.non_query(
                    &format!(
                        "DELETE FROM {} WHERE {PK_COLUMN} IN ({ph})",
                        self.schema.name
                    ),
                    &params,
                )?;
            }
            Ok(())
        })
    }

    /// Delete every row of the store and of each of its side tables.
    pub fn clear_all_data(&self) -> Result<()> {
        self.trans.atomically(|| {
            for index in self.side_table_indexes() {
                self.trans.non_query(
                    &format!("DELETE FROM {}_{}", self.schema.name, index.name),
                    &[],
                )?;
            }
            self.trans
                .non_query(&format!("DELETE FROM {}", self.schema.name), &[])
        })
    }

    // -----------------------------------------------------------------------
    // Index handles
    // -----------------------------------------------------------------------

    /// Open the query layer for one declared index.
    pub fn index(&self, name: &str) -> Result<SqlStoreIndex<'t, D>> {
        let index = self.schema.find_index(name).ok_or_else(|| {
            StorageError::IndexNotFound {
                store: self.schema.name.clone(),
                index: name.to_string(),
            }
        })?;
        Ok(SqlStoreIndex::for_index(self.trans, self.schema, index))
    }

    /// Open the query layer against the store's primary key.
    pub fn primary_key(&self) -> SqlStoreIndex<'t, D> {
        SqlStoreIndex::for_primary_key(self.trans, self.schema)
    }
}
