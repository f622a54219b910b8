//! Detached blob storage.
//!
//! Blobs are stored in fixed-size chunks keyed by `(blob_id, chunk_index)`.
//! Field rows reference a blob by holding its id as value text.

use crate::db::SqlDialect;
use crate::model::field::BlobId;
use crate::repo::error::StoreResult;
use rusqlite::{params, Connection};

const BLOB_CHUNK_BYTES: usize = 64 * 1024;

/// Deletes detached blobs once no field row references them.
pub trait BlobRemover {
    fn remove_blob(&self, blob_id: BlobId) -> StoreResult<usize>;
}

pub struct SqliteBlobRepository<'conn> {
    conn: &'conn Connection,
    dialect: &'conn SqlDialect,
}

impl<'conn> SqliteBlobRepository<'conn> {
    pub fn new(conn: &'conn Connection, dialect: &'conn SqlDialect) -> Self {
        Self { conn, dialect }
    }

    /// Replaces the blob with `data`. Empty data stores a single empty chunk.
    pub fn write_blob(&self, blob_id: BlobId, data: &[u8], now: i64) -> StoreResult<()> {
        self.remove_blob(blob_id)?;
        let sql = self.dialect.render(
            "INSERT INTO {blobs} ({blob_id}, {chunk_index}, {data}, {created})
             VALUES (?1, ?2, ?3, ?4);",
        );
        let mut stmt = self.conn.prepare(&sql)?;
        if data.is_empty() {
            stmt.execute(params![blob_id.to_string(), 0_i64, data, now])?;
            return Ok(());
        }
        for (index, chunk) in data.chunks(BLOB_CHUNK_BYTES).enumerate() {
            stmt.execute(params![blob_id.to_string(), index as i64, chunk, now])?;
        }
        Ok(())
    }

    /// Reassembles the blob, or `None` when it does not exist.
    pub fn read_blob(&self, blob_id: BlobId) -> StoreResult<Option<Vec<u8>>> {
        let mut stmt = self.conn.prepare(&self.dialect.render(
            "SELECT {data} FROM {blobs} WHERE {blob_id} = ?1 ORDER BY {chunk_index} ASC;",
        ))?;
        let mut rows = stmt.query(params![blob_id.to_string()])?;
        let mut data: Option<Vec<u8>> = None;
        while let Some(row) = rows.next()? {
            let chunk: Vec<u8> = row.get(0)?;
            data.get_or_insert_with(Vec::new).extend_from_slice(&chunk);
        }
        Ok(data)
    }

    pub fn blob_exists(&self, blob_id: BlobId) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            &self
                .dialect
                .render("SELECT EXISTS (SELECT 1 FROM {blobs} WHERE {blob_id} = ?1);"),
            params![blob_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }
}

impl BlobRemover for SqliteBlobRepository<'_> {
    fn remove_blob(&self, blob_id: BlobId) -> StoreResult<usize> {
        let deleted = self.conn.execute(
            &self
                .dialect
                .render("DELETE FROM {blobs} WHERE {blob_id} = ?1;"),
            params![blob_id.to_string()],
        )?;
        Ok(deleted)
    }
}
