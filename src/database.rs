//! Database entry point: version checking on open, then per-use
//! transactions over a shared driver.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{MigrationError, Result, SchemaError};
use crate::schema::Schema;
use crate::sql::driver::SqlDriver;
use crate::sql::executor::SqlTransaction;
use crate::sql::migrate;

pub struct SqlDatabase<D: SqlDriver + Clone> {
    driver: D,
    schema: Arc<Schema>,
}

impl<D: SqlDriver + Clone> SqlDatabase<D> {
    /// Open a database against `driver`, migrating its physical shape to
    /// `schema` if the persisted version differs. `wipe_if_exists` rebuilds
    /// from scratch regardless. Opening a database whose persisted version
    /// is newer than `schema.version` wipes it.
    pub fn open(driver: D, schema: Schema, wipe_if_exists: bool) -> Result<Self> {
        let mut names = HashSet::new();
        for store in &schema.stores {
            if !names.insert(store.name.as_str()) {
                return Err(SchemaError::DuplicateStore(store.name.clone()).into());
            }
        }
        let schema = Arc::new(schema);
        let db = Self {
            driver: driver.clone(),
            schema: Arc::clone(&schema),
        };
        db.check_version(wipe_if_exists)
            .map_err(|e| MigrationError {
                version: schema.version,
                source: Box::new(e),
            })?;
        Ok(db)
    }

    fn check_version(&self, mut wipe_if_exists: bool) -> Result<()> {
        let trans = self.transaction();
        trans.non_query("BEGIN", &[])?;
        let outcome = (|| {
            let old_version = migrate::get_db_version(&trans)?;
            if old_version != self.schema.version {
                if !wipe_if_exists && self.schema.version < old_version {
                    tracing::warn!(
                        stored = old_version,
                        declared = self.schema.version,
                        "database version newer than declared schema, wiping"
                    );
                    wipe_if_exists = true;
                }
                migrate::put_db_version(&trans, self.schema.version)?;
                migrate::upgrade(&trans, old_version, wipe_if_exists)?;
            } else if wipe_if_exists {
                migrate::upgrade(&trans, old_version, true)?;
            }
            Ok(())
        })();
        match outcome {
            Ok(()) => trans.non_query("COMMIT", &[]),
            Err(e) => {
                // Roll back on a best-effort basis; the original failure is
                // the one worth reporting.
                if let Err(rollback) = trans.non_query("ROLLBACK", &[]) {
                    tracing::error!(error = %rollback, "rollback failed after migration error");
                }
                trans.mark_closed();
                Err(e)
            }
        }
    }

    /// A transaction scope sharing this database's driver and schema.
    /// Each multi-statement store operation runs atomically inside its own
    /// savepoint; the scope adds the pending-statement registry and schema
    /// access on top of the engine's own commit semantics.
    pub fn transaction(&self) -> SqlTransaction<D> {
        SqlTransaction::new(self.driver.clone(), Arc::clone(&self.schema))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}
