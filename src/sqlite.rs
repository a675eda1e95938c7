//! SQLite driver built on rusqlite (bundled).
//!
//! The connection is protected by a `parking_lot::ReentrantMutex<RefCell<..>>`
//! so a transaction scope can hold the lock while the statements it issues
//! re-acquire it. The driver is `Clone`; clones share the same connection.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{Result, StorageError};
use crate::sql::driver::{DriverOutcome, Row, SqlDriver, SqlValue};

/// Bound-parameter ceiling of a stock SQLite build (SQLITE_MAX_VARIABLE_NUMBER).
const MAX_VARIABLES: usize = 999;
/// Statement-length ceiling of a stock SQLite build (SQLITE_MAX_SQL_LENGTH).
const MAX_SQL_LENGTH_BYTES: usize = 1_000_000;

#[derive(Clone)]
pub struct SqliteDriver {
    conn: Arc<ReentrantMutex<RefCell<Connection>>>,
    supports_full_text: bool,
}

impl SqliteDriver {
    /// Open a file-backed database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path).map_err(StorageError::Sqlite)?)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(StorageError::Sqlite)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(StorageError::Sqlite)?;
        Ok(Self {
            conn: Arc::new(ReentrantMutex::new(RefCell::new(conn))),
            supports_full_text: true,
        })
    }

    /// Pretend the engine has no native full-text module; full-text indexes
    /// degrade to a pattern-matched term-bag column.
    pub fn without_full_text(mut self) -> Self {
        self.supports_full_text = false;
        self
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Vec<Row>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn.prepare_cached(sql)?;
        let bound = rusqlite::params_from_iter(params.iter().map(|p| match p {
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Integer(n) => rusqlite::types::Value::Integer(*n),
            SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
            SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
        }));
        if stmt.column_count() == 0 {
            stmt.execute(bound)?;
            return Ok(Vec::new());
        }
        let column_count = stmt.column_count();
        let mut rows = stmt.query(bound)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(match row.get_ref(i)? {
                    ValueRef::Null | ValueRef::Blob(_) => SqlValue::Null,
                    ValueRef::Integer(n) => SqlValue::Integer(n),
                    ValueRef::Real(f) => SqlValue::Real(f),
                    ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
                });
            }
            out.push(cells);
        }
        Ok(out)
    }
}

impl SqlDriver for SqliteDriver {
    fn execute(&self, sql: &str, params: &[SqlValue], completion: &mut dyn FnMut(DriverOutcome)) {
        completion(self.run(sql, params).map_err(|e| e.to_string()));
    }

    fn max_variables(&self) -> usize {
        MAX_VARIABLES
    }

    fn max_sql_length_bytes(&self) -> usize {
        MAX_SQL_LENGTH_BYTES
    }

    fn supports_full_text(&self) -> bool {
        self.supports_full_text
    }
}
