#![allow(dead_code)]

use fieldstore_core::{
    open_db_in_memory, CacheInvalidator, FieldId, FieldScope, FieldValue, ItemId, ItemLockTable,
    ItemScope, Language, Partition, PartitionStore, SqliteSession, StoreConfig, StoreError, StoreResult,
    StoreSession, TxContext, Version,
};
use parking_lot::Mutex;
use rusqlite::{ffi, Connection};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const T0: i64 = 1_700_000_000_000;

pub fn open_memory_store() -> (StoreConfig, Connection) {
    let config = StoreConfig::default();
    let conn = open_db_in_memory(&config).unwrap();
    (config, conn)
}

pub fn lang(name: &str) -> Language {
    Language::new(name).unwrap()
}

pub fn ver(number: i64) -> Version {
    Version::new(number).unwrap()
}

pub fn shared_row(item_id: ItemId, field_id: FieldId, value: &str) -> FieldValue {
    FieldValue::new(item_id, field_id, FieldScope::Shared, value, T0)
}

pub fn unversioned_row(item_id: ItemId, field_id: FieldId, language: &str, value: &str) -> FieldValue {
    FieldValue::new(
        item_id,
        field_id,
        FieldScope::Unversioned {
            language: lang(language),
        },
        value,
        T0,
    )
}

pub fn versioned_row(
    item_id: ItemId,
    field_id: FieldId,
    language: &str,
    version: i64,
    value: &str,
) -> FieldValue {
    FieldValue::new(
        item_id,
        field_id,
        FieldScope::Versioned {
            language: lang(language),
            version: ver(version),
        },
        value,
        T0,
    )
}

pub fn seed_rows(session: &dyn StoreSession, rows: &[FieldValue]) {
    session
        .run_in_transaction(&mut |tx: &TxContext<'_>| {
            for row in rows {
                tx.fields.upsert_field(row)?;
            }
            Ok(())
        })
        .unwrap();
}

pub fn item_rows(session: &dyn StoreSession, item_id: ItemId, partition: Partition) -> Vec<FieldValue> {
    let mut rows = Vec::new();
    session
        .run_in_transaction(&mut |tx: &TxContext<'_>| {
            rows = tx.fields.list_item_fields(item_id, partition)?;
            Ok(())
        })
        .unwrap();
    rows
}

pub fn field_rows(session: &dyn StoreSession, field_id: FieldId, partition: Partition) -> Vec<FieldValue> {
    let mut rows = Vec::new();
    session
        .run_in_transaction(&mut |tx: &TxContext<'_>| {
            rows = tx.fields.list_field_rows(field_id, partition)?;
            Ok(())
        })
        .unwrap();
    rows
}

pub fn sqlite_failure(code: std::os::raw::c_int) -> StoreError {
    StoreError::from(rusqlite::Error::SqliteFailure(ffi::Error::new(code), None))
}

/// Observable partition store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Begin,
    Upsert { partition: Partition, field_id: FieldId },
    Delete { partition: Partition, field_id: FieldId },
    ClearItemVersion,
    Commit,
    Rollback,
}

/// Shared recorder and failure injector for instrumented sessions.
#[derive(Debug, Default)]
pub struct Probe {
    ops: Mutex<Vec<StoreOp>>,
    transient_failures: AtomicU32,
    constraint_failures: AtomicU32,
    write_delay_ms: AtomicU32,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `count` upserts or copies with `SQLITE_BUSY`.
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` upserts or copies with `SQLITE_CONSTRAINT`.
    pub fn fail_with_constraint(&self, count: u32) {
        self.constraint_failures.store(count, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    fn record(&self, op: StoreOp) {
        self.ops.lock().push(op);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn before_write(&self) -> StoreResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(u64::from(delay)));
        }
        if Self::take(&self.transient_failures) {
            return Err(sqlite_failure(ffi::SQLITE_BUSY));
        }
        if Self::take(&self.constraint_failures) {
            return Err(sqlite_failure(ffi::SQLITE_CONSTRAINT));
        }
        Ok(())
    }
}

/// Session wrapper that records store operations and injects failures.
pub struct InstrumentedSession<'conn> {
    inner: SqliteSession<'conn>,
    probe: Arc<Probe>,
}

impl<'conn> InstrumentedSession<'conn> {
    pub fn new(conn: &'conn Connection, config: &StoreConfig, probe: Arc<Probe>) -> Self {
        Self {
            inner: SqliteSession::try_new(conn, config.dialect()).unwrap(),
            probe,
        }
    }
}

impl StoreSession for InstrumentedSession<'_> {
    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&TxContext<'_>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.probe.record(StoreOp::Begin);
        let result = self.inner.run_in_transaction(&mut |tx: &TxContext<'_>| {
            let fields = InstrumentedStore {
                inner: tx.fields,
                probe: &self.probe,
            };
            let context = TxContext {
                fields: &fields,
                items: tx.items,
                blobs: tx.blobs,
            };
            work(&context)
        });
        self.probe.record(if result.is_ok() {
            StoreOp::Commit
        } else {
            StoreOp::Rollback
        });
        result
    }
}

struct InstrumentedStore<'a> {
    inner: &'a dyn PartitionStore,
    probe: &'a Probe,
}

impl PartitionStore for InstrumentedStore<'_> {
    fn get_field(
        &self,
        item_id: ItemId,
        field_id: FieldId,
        scope: &FieldScope,
    ) -> StoreResult<Option<FieldValue>> {
        self.inner.get_field(item_id, field_id, scope)
    }

    fn list_item_fields(&self, item_id: ItemId, partition: Partition) -> StoreResult<Vec<FieldValue>> {
        self.inner.list_item_fields(item_id, partition)
    }

    fn list_field_rows(&self, field_id: FieldId, partition: Partition) -> StoreResult<Vec<FieldValue>> {
        self.inner.list_field_rows(field_id, partition)
    }

    fn upsert_field(&self, value: &FieldValue) -> StoreResult<()> {
        self.probe.record(StoreOp::Upsert {
            partition: value.partition(),
            field_id: value.field_id,
        });
        self.probe.before_write()?;
        self.inner.upsert_field(value)
    }

    fn delete_field(&self, item_id: ItemId, field_id: FieldId, scope: &FieldScope) -> StoreResult<usize> {
        self.probe.record(StoreOp::Delete {
            partition: scope.partition(),
            field_id,
        });
        self.inner.delete_field(item_id, field_id, scope)
    }

    fn clear_item_version(&self, item_id: ItemId, language: &Language, version: Version) -> StoreResult<usize> {
        self.probe.record(StoreOp::ClearItemVersion);
        self.inner.clear_item_version(item_id, language, version)
    }

    fn delete_field_in_scope(&self, partition: Partition, field_id: FieldId, scope: ItemScope) -> StoreResult<usize> {
        self.inner.delete_field_in_scope(partition, field_id, scope)
    }

    fn distinct_items_with_field(
        &self,
        partition: Partition,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<Vec<ItemId>> {
        self.inner.distinct_items_with_field(partition, field_id, scope)
    }

    fn distinct_languages(&self, partition: Partition, item_id: ItemId) -> StoreResult<Vec<Language>> {
        self.inner.distinct_languages(partition, item_id)
    }

    fn distinct_versions(&self, item_id: ItemId, language: &Language) -> StoreResult<Vec<Version>> {
        self.inner.distinct_versions(item_id, language)
    }

    fn copy_to_versioned(
        &self,
        source: Partition,
        item_id: ItemId,
        field_id: FieldId,
        language: &Language,
        version: Version,
    ) -> StoreResult<usize> {
        self.probe.before_write()?;
        self.inner
            .copy_to_versioned(source, item_id, field_id, language, version)
    }

    fn is_blob_referenced(&self, blob_ref: &str) -> StoreResult<bool> {
        self.inner.is_blob_referenced(blob_ref)
    }
}

/// Session wrapper that records, per transaction, whether the item lock was held.
pub struct LockObservingSession<'conn> {
    inner: SqliteSession<'conn>,
    locks: Arc<ItemLockTable>,
    item_id: ItemId,
    observed: Mutex<Vec<bool>>,
}

impl<'conn> LockObservingSession<'conn> {
    pub fn new(
        conn: &'conn Connection,
        config: &StoreConfig,
        locks: Arc<ItemLockTable>,
        item_id: ItemId,
    ) -> Self {
        Self {
            inner: SqliteSession::try_new(conn, config.dialect()).unwrap(),
            locks,
            item_id,
            observed: Mutex::new(Vec::new()),
        }
    }

    pub fn observed(&self) -> Vec<bool> {
        self.observed.lock().clone()
    }
}

impl StoreSession for LockObservingSession<'_> {
    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&TxContext<'_>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.observed.lock().push(self.locks.is_locked(self.item_id));
        self.inner.run_in_transaction(work)
    }
}

/// Cache invalidator that counts calls.
#[derive(Debug, Default)]
pub struct RecordingCache {
    pub prefetched: Mutex<Vec<ItemId>>,
    pub language_list: AtomicUsize,
}

impl RecordingCache {
    pub fn language_list_invalidations(&self) -> usize {
        self.language_list.load(Ordering::SeqCst)
    }
}

impl CacheInvalidator for RecordingCache {
    fn invalidate_prefetch(&self, item_id: ItemId) {
        self.prefetched.lock().push(item_id);
    }

    fn invalidate_language_list(&self) {
        self.language_list.fetch_add(1, Ordering::SeqCst);
    }
}
