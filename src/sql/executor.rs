//! Transactional query executor.
//!
//! `SqlTransaction` exclusively owns one backing-engine transaction handle.
//! It tracks every in-flight statement in an ordered, transaction-scoped
//! registry so that an externally observed fatal transaction error can
//! force-fail everything still outstanding, and so that a driver completing
//! the same statement twice is surfaced as a diagnostic.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::schema::Schema;
use crate::sql::driver::{DriverOutcome, Row, SqlDriver, SqlValue};
use crate::sql::store::SqlStore;

pub struct SqlTransaction<D: SqlDriver> {
    driver: D,
    schema: Arc<Schema>,
    open: Cell<bool>,
    next_handle: Cell<u64>,
    /// Handle → statement text, for statements whose completion has not
    /// yet been observed.
    pending: RefCell<BTreeMap<u64, String>>,
    /// Set by `fail_all_pending`; applied to statements that never complete.
    forced_failure: RefCell<Option<String>>,
    next_savepoint: Cell<u64>,
}

impl<D: SqlDriver> SqlTransaction<D> {
    pub fn new(driver: D, schema: Arc<Schema>) -> Self {
        Self {
            driver,
            schema,
            open: Cell::new(true),
            next_handle: Cell::new(0),
            pending: RefCell::new(BTreeMap::new()),
            forced_failure: RefCell::new(None),
            next_savepoint: Cell::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    /// Abandon the transaction. Every further `run_query` fails immediately.
    pub fn mark_closed(&self) {
        self.open.set(false);
    }

    /// An external observer has determined the transaction is dead but the
    /// engine will not report failures for statements already in flight.
    /// Drain the registry and fail each of them with `error`.
    pub fn fail_all_pending(&self, error: &str) {
        *self.forced_failure.borrow_mut() = Some(error.to_string());
        let drained = std::mem::take(&mut *self.pending.borrow_mut());
        for (_, sql) in drained {
            tracing::warn!(%sql, error, "force-failing pending statement");
        }
    }

    /// Execute one statement and return its rows.
    pub fn run_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        if !self.open.get() {
            return Err(StorageError::TransactionClosed.into());
        }
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.pending.borrow_mut().insert(handle, sql.to_string());

        let outcome: RefCell<Option<DriverOutcome>> = RefCell::new(None);
        self.driver.execute(sql, params, &mut |result| {
            if self.pending.borrow_mut().remove(&handle).is_some() {
                *outcome.borrow_mut() = Some(result);
            } else {
                tracing::error!(sql, "SQL statement resolved twice");
            }
        });

        match outcome.into_inner() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(StorageError::Statement { message }.into()),
            None => {
                // Never completed: either force-failed from outside, or the
                // driver broke its exactly-once contract.
                self.pending.borrow_mut().remove(&handle);
                match self.forced_failure.borrow().clone() {
                    Some(message) => Err(StorageError::Statement { message }.into()),
                    None => Err(StorageError::Incomplete {
                        sql: sql.to_string(),
                    }
                    .into()),
                }
            }
        }
    }

    /// Execute a statement whose rows are irrelevant.
    pub fn non_query(&self, sql: &str, params: &[SqlValue]) -> Result<()> {
        self.run_query(sql, params).map(|_| ())
    }

    /// Run a multi-statement operation atomically. A failure anywhere in
    /// `op` rolls back every statement it issued, so no operation can leave
    /// a main table and its side tables disagreeing. Savepoints nest inside
    /// an already-open engine transaction, so the migration pass can reuse
    /// the same store operations.
    pub fn atomically<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.open.get() {
            return Err(StorageError::TransactionClosed.into());
        }
        let name = format!("op_{}", self.next_savepoint.get());
        self.next_savepoint.set(self.next_savepoint.get() + 1);
        self.non_query(&format!("SAVEPOINT {name}"), &[])?;
        match op() {
            Ok(value) => {
                self.non_query(&format!("RELEASE {name}"), &[])?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.non_query(&format!("ROLLBACK TO {name}"), &[]) {
                    tracing::error!(error = %rollback, "savepoint rollback failed");
                } else if let Err(release) = self.non_query(&format!("RELEASE {name}"), &[]) {
                    tracing::error!(error = %release, "savepoint release failed");
                }
                Err(e)
            }
        }
    }

    /// Run a query whose first column is a serialized record payload and
    /// decode each row.
    pub fn get_results_from_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Value>> {
        let rows = self.run_query(sql, params)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let text = row.first().and_then(SqlValue::as_text).ok_or_else(|| {
                StorageError::Corruption {
                    context: sql.to_string(),
                    message: "payload column is not text".to_string(),
                }
            })?;
            let record = serde_json::from_str(text).map_err(|e| StorageError::Corruption {
                context: sql.to_string(),
                message: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Like `get_results_from_query`, keeping only the first row.
    pub fn get_result_from_query(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Value>> {
        Ok(self.get_results_from_query(sql, params)?.into_iter().next())
    }

    /// Open the access layer for one declared store.
    pub fn store(&self, name: &str) -> Result<SqlStore<'_, D>> {
        let store = self
            .schema
            .stores
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
        Ok(SqlStore::new(self, store))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn max_variables(&self) -> usize {
        self.driver.max_variables()
    }

    pub fn max_sql_length_bytes(&self) -> usize {
        self.driver.max_sql_length_bytes()
    }

    pub fn supports_full_text(&self) -> bool {
        self.driver.supports_full_text()
    }
}

// ============================================================================
// Tests
// ============================================================================
