use thiserror::Error;

// ---------------------------------------------------------------------------
// KeyError
// ---------------------------------------------------------------------------

/// Failures while encoding a logical key. These are local to one operation
/// and are raised before any SQL is issued.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Unsupported key shape: {0}")]
    UnsupportedShape(String),

    #[error("Nested containers cannot be used as key components")]
    NestedContainer,

    #[error("Key path \"{path}\" not found in record")]
    MissingKeyPath { path: String },
}

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(
        "Index \"{index}\" on store \"{store}\": multiEntry cannot be combined \
         with a compound key path"
    )]
    MultiEntryCompoundKey { store: String, index: String },

    #[error("Duplicate store name \"{0}\" in schema")]
    DuplicateStore(String),
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Transaction already closed")]
    TransactionClosed,

    #[error("SQL statement failed: {message}")]
    Statement { message: String },

    #[error("SQL statement never completed: {sql}")]
    Incomplete { sql: String },

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Index not found: {store}/{index}")]
    IndexNotFound { store: String, index: String },

    #[error("Corrupt row in {context}: {message}")]
    Corruption { context: String, message: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// MigrationError
// ---------------------------------------------------------------------------

/// Any failure during schema reconciliation aborts the entire open. No
/// partial-success state is guaranteed beyond what the backing engine's
/// own transaction rollback provides.
#[derive(Debug, Error)]
#[error("Schema migration to version {version} failed")]
pub struct MigrationError {
    pub version: u32,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

// ---------------------------------------------------------------------------
// SqlStoreError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SqlStoreError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `SqlStoreError`.
pub type Result<T, E = SqlStoreError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
