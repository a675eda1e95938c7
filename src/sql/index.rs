//! Index query layer: ordered scans, range queries, counts, and full-text
//! search against one index (or the primary key) of one store.
//!
//! At construction the index resolves which physical shape backs it — the
//! primary table, a side table joined back to the primary table, a side
//! table carrying its own payload copy, or an indexed column on the main
//! table — and every query is rendered against that shape.

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::fulltext::break_and_normalize_phrase;
use crate::keys::{encode_key_for_path, Key};
use crate::schema::{IndexSchema, StoreSchema};
use crate::sql::driver::{SqlDriver, SqlValue};
use crate::sql::executor::SqlTransaction;
use crate::sql::{
    index_column, DATA_COLUMN, FAKE_FTS_JOIN_TOKEN, LIMIT_MAX, PK_COLUMN, SIDE_KEY_COLUMN,
    SIDE_REFPK_COLUMN,
};

/// Scan direction. `None` lets the engine return rows in whatever order
/// the backing shape produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuerySortOrder {
    #[default]
    None,
    Forward,
    Reverse,
}

/// How multiple full-text terms combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullTextTermResolution {
    And,
    Or,
}

/// The physical shape a query renders against.
enum Backing {
    /// The main table's primary key column.
    Primary,
    /// Side table joined back to the main table for the payload.
    SideJoined { side_table: String },
    /// Side table that carries its own payload copy.
    SideWithData { side_table: String },
    /// `nsp_i_<name>` column on the main table.
    Column { column: String },
}

pub struct SqlStoreIndex<'t, D: SqlDriver> {
    trans: &'t SqlTransaction<D>,
    store: &'t StoreSchema,
    index: Option<&'t IndexSchema>,
    backing: Backing,
}

impl<'t, D: SqlDriver> SqlStoreIndex<'t, D> {
    pub(crate) fn for_primary_key(trans: &'t SqlTransaction<D>, store: &'t StoreSchema) -> Self {
        Self {
            trans,
            store,
            index: None,
            backing: Backing::Primary,
        }
    }

    pub(crate) fn for_index(
        trans: &'t SqlTransaction<D>,
        store: &'t StoreSchema,
        index: &'t IndexSchema,
    ) -> Self {
        let backing = if index.uses_side_table(trans.supports_full_text()) {
            let side_table = format!("{}_{}", store.name, index.name);
            // Native full-text side tables never carry a payload column.
            if index.include_data_in_index && !index.full_text {
                Backing::SideWithData { side_table }
            } else {
                Backing::SideJoined { side_table }
            }
        } else {
            Backing::Column {
                column: index_column(&index.name),
            }
        };
        Self {
            trans,
            store,
            index: Some(index),
            backing,
        }
    }

    /// SELECT head ("SELECT ... FROM ...") for payload queries against this
    /// backing, and the key expression WHERE/ORDER BY clauses refer to.
    fn select_head(&self) -> (String, String) {
        let store = &self.store.name;
        match &self.backing {
            Backing::Primary => (
                format!("SELECT {DATA_COLUMN} FROM {store}"),
                PK_COLUMN.to_string(),
            ),
            Backing::SideJoined { side_table } => (
                format!(
                    "SELECT t.{DATA_COLUMN} FROM {side_table} mi \
                     LEFT JOIN {store} t ON mi.{SIDE_REFPK_COLUMN} = t.{PK_COLUMN}"
                ),
                format!("mi.{SIDE_KEY_COLUMN}"),
            ),
            Backing::SideWithData { side_table } => (
                format!("SELECT {DATA_COLUMN} FROM {side_table}"),
                SIDE_KEY_COLUMN.to_string(),
            ),
            Backing::Column { column } => {
                (format!("SELECT {DATA_COLUMN} FROM {store}"), column.clone())
            }
        }
    }

    /// COUNT head and key expression for count queries.
    fn count_head(&self) -> (String, String) {
        let store = &self.store.name;
        match &self.backing {
            Backing::Primary => (
                format!("SELECT COUNT(*) FROM {store}"),
                PK_COLUMN.to_string(),
            ),
            Backing::SideJoined { side_table } | Backing::SideWithData { side_table } => (
                format!("SELECT COUNT(*) FROM {side_table}"),
                SIDE_KEY_COLUMN.to_string(),
            ),
            Backing::Column { column } => {
                (format!("SELECT COUNT(*) FROM {store}"), column.clone())
            }
        }
    }

    fn key_path(&self) -> &crate::schema::KeyPath {
        match self.index {
            Some(index) => &index.key_path,
            None => &self.store.primary_key_path,
        }
    }

    fn encode(&self, key: &Key) -> Result<String> {
        Ok(encode_key_for_path(key, self.key_path())?)
    }

    /// Append ORDER BY / LIMIT / OFFSET and run. LIMIT is clamped to the
    /// engine-safe ceiling; an OFFSET without a LIMIT still needs a LIMIT
    /// clause, so -1 (unbounded) is emitted.
    fn handle_query(
        &self,
        mut sql: String,
        params: &[SqlValue],
        key_expr: &str,
        sort: QuerySortOrder,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Value>> {
        let direction = match sort {
            QuerySortOrder::Reverse => "DESC",
            QuerySortOrder::None | QuerySortOrder::Forward => "ASC",
        };
        sql.push_str(&format!(" ORDER BY {key_expr} {direction}"));
        if let Some(limit) = limit {
            let limit = if limit > LIMIT_MAX {
                tracing::warn!(limit, "query limit clamped");
                LIMIT_MAX
            } else {
                limit
            };
            sql.push_str(&format!(" LIMIT {limit}"));
        } else if offset.is_some() {
            sql.push_str(" LIMIT -1");
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        self.trans.get_results_from_query(&sql, params)
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    pub fn get_all(
        &self,
        sort: QuerySortOrder,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Value>> {
        let (head, key_expr) = self.select_head();
        self.handle_query(head, &[], &key_expr, sort, limit, offset)
    }

    /// All records whose index key equals `key` exactly.
    pub fn get_only(
        &self,
        key: &Key,
        sort: QuerySortOrder,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Value>> {
        let encoded = self.encode(key)?;
        let (head, key_expr) = self.select_head();
        let sql = format!("{head} WHERE {key_expr} = ?");
        self.handle_query(
            sql,
            &[SqlValue::Text(encoded)],
            &key_expr,
            sort,
            limit,
            offset,
        )
    }

    pub fn get_range(
        &self,
        low: &Key,
        high: &Key,
        low_exclusive: bool,
        high_exclusive: bool,
        sort: QuerySortOrder,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Value>> {
        let (head, key_expr) = self.select_head();
        let (checks, params) =
            self.range_checks(&key_expr, low, high, low_exclusive, high_exclusive)?;
        let sql = format!("{head} WHERE {checks}");
        self.handle_query(sql, &params, &key_expr, sort, limit, offset)
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    pub fn count_all(&self) -> Result<u64> {
        let (head, _) = self.count_head();
        self.run_count(&head, &[])
    }

    pub fn count_only(&self, key: &Key) -> Result<u64> {
        let encoded = self.encode(key)?;
        let (head, key_expr) = self.count_head();
        self.run_count(
            &format!("{head} WHERE {key_expr} = ?"),
            &[SqlValue::Text(encoded)],
        )
    }

    pub fn count_range(
        &self,
        low: &Key,
        high: &Key,
        low_exclusive: bool,
        high_exclusive: bool,
    ) -> Result<u64> {
        let (head, key_expr) = self.count_head();
        let (checks, params) =
            self.range_checks(&key_expr, low, high, low_exclusive, high_exclusive)?;
        self.run_count(&format!("{head} WHERE {checks}"), &params)
    }

    fn run_count(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let rows = self.trans.run_query(sql, params)?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_integer)
            .ok_or_else(|| StorageError::Corruption {
                context: sql.to_string(),
                message: "count query returned no integer".to_string(),
            })?;
        Ok(count.max(0) as u64)
    }

    fn range_checks(
        &self,
        key_expr: &str,
        low: &Key,
        high: &Key,
        low_exclusive: bool,
        high_exclusive: bool,
    ) -> Result<(String, Vec<SqlValue>)> {
        let low_op = if low_exclusive { ">" } else { ">=" };
        let high_op = if high_exclusive { "<" } else { "<=" };
        let params = vec![
            SqlValue::Text(self.encode(low)?),
            SqlValue::Text(self.encode(high)?),
        ];
        Ok((
            format!("{key_expr} {low_op} ? AND {key_expr} {high_op} ?"),
            params,
        ))
    }

    // -----------------------------------------------------------------------
    // Full text
    // -----------------------------------------------------------------------

    /// Prefix-match every normalized term of `phrase` against this full-text
    /// index, combined with `resolution`. An empty phrase matches nothing.
    pub fn full_text_search(
        &self,
        phrase: &str,
        resolution: FullTextTermResolution,
        limit: Option<u64>,
    ) -> Result<Vec<Value>> {
        let index = self.index.ok_or_else(|| StorageError::IndexNotFound {
            store: self.store.name.clone(),
            index: "<primary key>".to_string(),
        })?;
        debug_assert!(index.full_text, "full_text_search on a non-full-text index");
        let terms = break_and_normalize_phrase(phrase);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let limit_clause = match limit {
            Some(limit) => format!(" LIMIT {}", limit.min(LIMIT_MAX)),
            None => String::new(),
        };

        match &self.backing {
            Backing::SideJoined { side_table } | Backing::SideWithData { side_table } => {
                self.native_search(side_table, &terms, resolution, &limit_clause)
            }
            Backing::Column { column } => {
                self.emulated_search(column, &terms, resolution, &limit_clause)
            }
            Backing::Primary => Err(StorageError::IndexNotFound {
                store: self.store.name.clone(),
                index: "<primary key>".to_string(),
            }
            .into()),
        }
    }

    fn native_search(
        &self,
        side_table: &str,
        terms: &[String],
        resolution: FullTextTermResolution,
        limit_clause: &str,
    ) -> Result<Vec<Value>> {
        let store = &self.store.name;
        match resolution {
            FullTextTermResolution::And => {
                // One MATCH with all prefix terms; the engine ANDs them.
                let query = terms
                    .iter()
                    .map(|t| format!("{t}*"))
                    .collect::<Vec<_>>()
                    .join(" ");
                let sql = format!(
                    "SELECT t.{DATA_COLUMN} FROM {side_table} mi \
                     LEFT JOIN {store} t ON mi.{SIDE_REFPK_COLUMN} = t.{PK_COLUMN} \
                     WHERE mi.{SIDE_KEY_COLUMN} MATCH ?{limit_clause}"
                );
                self.trans
                    .get_results_from_query(&sql, &[SqlValue::Text(query)])
            }
            FullTextTermResolution::Or => {
                // MATCH supports only conjunction portably, so union one
                // MATCH per term and deduplicate refpks before the join.
                let per_term =
                    format!("SELECT * FROM {side_table} WHERE {SIDE_KEY_COLUMN} MATCH ?");
                let union = vec![per_term.as_str(); terms.len()].join(" UNION ALL ");
                let sql = format!(
                    "SELECT t.{DATA_COLUMN} FROM \
                     (SELECT DISTINCT {SIDE_REFPK_COLUMN} FROM ({union})) mi \
                     LEFT JOIN {store} t ON mi.{SIDE_REFPK_COLUMN} = t.{PK_COLUMN}\
                     {limit_clause}"
                );
                let params: Vec<SqlValue> = terms
                    .iter()
                    .map(|t| SqlValue::Text(format!("{t}*")))
                    .collect();
                self.trans.get_results_from_query(&sql, &params)
            }
        }
    }

    /// No native engine: prefix-match against the delimited term bag stored
    /// in the index column.
    fn emulated_search(
        &self,
        column: &str,
        terms: &[String],
        resolution: FullTextTermResolution,
        limit_clause: &str,
    ) -> Result<Vec<Value>> {
        let joiner = match resolution {
            FullTextTermResolution::And => " AND ",
            FullTextTermResolution::Or => " OR ",
        };
        let checks = vec![format!("{column} LIKE ?"); terms.len()].join(joiner);
        let params: Vec<SqlValue> = terms
            .iter()
            .map(|t| SqlValue::Text(format!("%{FAKE_FTS_JOIN_TOKEN}{t}%")))
            .collect();
        let sql = format!(
            "SELECT {DATA_COLUMN} FROM {} WHERE ({checks}){limit_clause}",
            self.store.name
        );
        self.trans.get_results_from_query(&sql, &params)
    }
}
