//! SQL translation core: driver seam, transactional executor, store and
//! index access layers, and the schema migration engine.

pub mod driver;
pub mod executor;
pub mod index;
pub mod migrate;
pub mod store;

/// Reserved table holding index metadata and the schema-version marker.
pub(crate) const METADATA_TABLE: &str = "metadata";
pub(crate) const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Synthetic primary key column on every main table.
pub(crate) const PK_COLUMN: &str = "nsp_pk";
/// Serialized record payload column.
pub(crate) const DATA_COLUMN: &str = "nsp_data";
/// Side-table columns.
pub(crate) const SIDE_KEY_COLUMN: &str = "nsp_key";
pub(crate) const SIDE_REFPK_COLUMN: &str = "nsp_refpk";

/// Delimiter for the denormalized term bag stored when no native full-text
/// engine is available. Chosen to never appear inside a normalized term.
pub(crate) const FAKE_FTS_JOIN_TOKEN: &str = "^$^";

/// Ceiling applied to caller-supplied LIMIT values.
pub(crate) const LIMIT_MAX: u64 = 1 << 32;

/// Column name for a column-backed index.
pub(crate) fn index_column(index_name: &str) -> String {
    format!("nsp_i_{index_name}")
}

/// `?,?,...,?` for `count` bound parameters.
pub(crate) fn placeholders(count: usize) -> String {
    debug_assert!(count >= 1, "statement requires at least one parameter");
    let mut out = "?,".repeat(count);
    out.pop();
    out
}
