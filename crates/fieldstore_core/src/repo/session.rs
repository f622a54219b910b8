//! Transaction boundary over the repositories of one connection.
//!
//! # Responsibility
//! - Run a unit of work against partition, item and blob stores inside one
//!   immediate transaction.
//! - Commit only when the unit of work succeeds; roll back otherwise.
//!
//! # Invariants
//! - A session refuses connections that were not migrated to the latest
//!   schema version.
//! - Nothing written inside a failed unit of work stays visible.

use crate::db::migrations::latest_version;
use crate::db::SqlDialect;
use crate::repo::blob_repo::{BlobRemover, SqliteBlobRepository};
use crate::repo::error::{StoreError, StoreResult};
use crate::repo::item_repo::{ItemStore, SqliteItemRepository};
use crate::repo::partition_repo::{PartitionStore, SqlitePartitionStore};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Stores visible to a unit of work; all share one open transaction.
pub struct TxContext<'a> {
    pub fields: &'a dyn PartitionStore,
    pub items: &'a dyn ItemStore,
    pub blobs: &'a dyn BlobRemover,
}

/// Unit-of-work seam used by migration and write services.
pub trait StoreSession {
    /// Runs `work` in a fresh transaction and commits when it returns `Ok`.
    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&TxContext<'_>) -> StoreResult<()>,
    ) -> StoreResult<()>;
}

/// SQLite session borrowing a migrated connection.
pub struct SqliteSession<'conn> {
    conn: &'conn Connection,
    dialect: SqlDialect,
}

impl<'conn> SqliteSession<'conn> {
    /// Creates a session after verifying the connection schema version.
    ///
    /// # Errors
    /// - [`StoreError::UninitializedConnection`] when migrations were not
    ///   applied.
    pub fn try_new(conn: &'conn Connection, dialect: SqlDialect) -> StoreResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn, dialect })
    }

    pub fn dialect(&self) -> &SqlDialect {
        &self.dialect
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }
}

impl StoreSession for SqliteSession<'_> {
    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&TxContext<'_>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        {
            let fields = SqlitePartitionStore::new(&tx, &self.dialect);
            let items = SqliteItemRepository::new(&tx, &self.dialect);
            let blobs = SqliteBlobRepository::new(&tx, &self.dialect);
            let context = TxContext {
                fields: &fields,
                items: &items,
                blobs: &blobs,
            };
            work(&context)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn ensure_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SqliteSession, StoreSession};
    use crate::config::StoreConfig;
    use crate::db::open_db_in_memory;
    use crate::model::field::{FieldScope, FieldValue, Partition};
    use crate::repo::error::StoreError;
    use rusqlite::Connection;
    use uuid::Uuid;

    #[test]
    fn unmigrated_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let result = SqliteSession::try_new(&conn, StoreConfig::default().dialect());
        assert!(matches!(
            result,
            Err(StoreError::UninitializedConnection {
                actual_version: 0,
                ..
            })
        ));
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let config = StoreConfig::default();
        let conn = open_db_in_memory(&config).unwrap();
        let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
        let item_id = Uuid::new_v4();

        let result = session.run_in_transaction(&mut |tx| {
            tx.fields.upsert_field(&FieldValue::new(
                item_id,
                Uuid::new_v4(),
                FieldScope::Shared,
                "v",
                1,
            ))?;
            Err(StoreError::InvalidData("abort".to_string()))
        });
        assert!(result.is_err());

        session
            .run_in_transaction(&mut |tx| {
                assert!(tx
                    .fields
                    .list_item_fields(item_id, Partition::SharedFields)?
                    .is_empty());
                Ok(())
            })
            .unwrap();
    }
}
