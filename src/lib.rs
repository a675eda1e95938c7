//! Key-value store with secondary indexes and full-text search, layered
//! over a pluggable SQL engine.
//!
//! Records are JSON documents stored one-per-row with an order-preserving
//! encoded primary key. Secondary indexes are either extra columns on the
//! main table or separate side tables (multi-entry and native full-text),
//! kept in sync by the store access layer. On open, the declared schema is
//! reconciled against the persisted one by the migration engine.

pub mod database;
pub mod error;
pub mod fulltext;
pub mod keys;
pub mod schema;
pub mod sql;
pub mod sqlite;

pub use database::SqlDatabase;
pub use error::{KeyError, MigrationError, Result, SchemaError, SqlStoreError, StorageError};
pub use keys::Key;
pub use schema::{IndexSchema, KeyPath, Schema, StoreSchema};
pub use sql::driver::{Row, SqlDriver, SqlValue};
pub use sql::executor::SqlTransaction;
pub use sql::index::{FullTextTermResolution, QuerySortOrder, SqlStoreIndex};
pub use sql::store::SqlStore;
pub use sqlite::SqliteDriver;
