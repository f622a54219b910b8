//! Versioned field writer.
//!
//! # Responsibility
//! - Apply one item's field change set to the partition implied by each
//!   field's sharing type.
//! - Save item properties and field changes as one unit of work.
//! - Remove orphaned blobs and invalidate caches after commit.
//!
//! # Invariants
//! - All writes to one item are serialized by the item lock table.
//! - Changes are applied in the order Shared, Unversioned, Versioned; removals
//!   of unclassified fields run last and touch all three partitions.
//! - A batch commits entirely or not at all. Transient failures rerun the
//!   whole batch with the same timestamp.

use crate::cache::CacheInvalidator;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::model::field::{
    BlobId, FieldId, FieldScope, FieldValue, ItemId, Language, SharingType, TemplateId, Version,
};
use crate::model::item::{FieldChange, ItemChanges, ItemDefinition};
use crate::repo::error::{StoreError, StoreErrorKind, StoreResult};
use crate::repo::partition_repo::PartitionStore;
use crate::repo::session::{StoreSession, TxContext};
use crate::service::item_lock::ItemLockTable;
use crate::service::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::sharing::SharingClassifier;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

pub type WriteResult<T> = Result<T, WriteError>;

#[derive(Debug)]
pub enum WriteError {
    /// A change contradicts itself (e.g. definition id differs from field id).
    InvalidChange {
        item_id: ItemId,
        field_id: FieldId,
        message: String,
    },
    /// Non-transient storage failure; nothing was committed.
    Store { item_id: ItemId, source: StoreError },
    /// Every attempt failed transiently; nothing was committed.
    RetriesExhausted {
        item_id: ItemId,
        attempts: u32,
        source: StoreError,
    },
}

impl WriteError {
    pub fn item_id(&self) -> ItemId {
        match self {
            Self::InvalidChange { item_id, .. }
            | Self::Store { item_id, .. }
            | Self::RetriesExhausted { item_id, .. } => *item_id,
        }
    }

    pub fn kind(&self) -> StoreErrorKind {
        match self {
            Self::InvalidChange { .. } => StoreErrorKind::InvalidInput,
            Self::Store { source, .. } | Self::RetriesExhausted { source, .. } => source.kind(),
        }
    }
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidChange {
                item_id,
                field_id,
                message,
            } => write!(f, "invalid change of field {field_id} on item {item_id}: {message}"),
            Self::Store { item_id, source } => {
                write!(f, "failed to write fields of item {item_id}: {source}")
            }
            Self::RetriesExhausted {
                item_id,
                attempts,
                source,
            } => write!(
                f,
                "failed to write fields of item {item_id} after {attempts} attempts: {source}"
            ),
        }
    }
}

impl Error for WriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidChange { .. } => None,
            Self::Store { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
        }
    }
}

/// Result of `apply_field_changes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Transaction attempts used, including the successful one.
    pub attempts: u32,
    pub rows_written: usize,
    pub rows_removed: usize,
    /// Writes dropped because their field could not be classified.
    pub skipped_unknown: usize,
}

/// Result of `save_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Transaction attempts used; `0` when there was nothing to write.
    pub attempts: u32,
    pub item_updated: bool,
    pub rows_written: usize,
    pub rows_removed: usize,
    /// Detached blobs deleted after commit.
    pub removed_blobs: Vec<BlobId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct BatchCounts {
    rows_written: usize,
    rows_removed: usize,
    item_updated: bool,
}

/// Where a batch lands: item, language and version.
struct Target<'a> {
    item_id: ItemId,
    language: &'a Language,
    version: Version,
}

/// Writes field change sets under per-item locks and bounded retries.
///
/// Shareable across threads; each call brings its own session.
pub struct ItemFieldWriter {
    classifier: SharingClassifier,
    locks: Arc<ItemLockTable>,
    retry: RetryPolicy,
    cache: Arc<dyn CacheInvalidator>,
    clock: Arc<dyn Clock>,
    language_template_id: TemplateId,
}

impl ItemFieldWriter {
    pub fn new(config: &StoreConfig, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            classifier: SharingClassifier::new(config.default_sharing.clone()),
            locks: Arc::new(ItemLockTable::new()),
            retry: config.retry,
            cache,
            clock: Arc::new(SystemClock),
            language_template_id: config.language_template_id,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shares a lock table with other writers of the same store.
    pub fn with_lock_table(mut self, locks: Arc<ItemLockTable>) -> Self {
        self.locks = locks;
        self
    }

    pub fn classifier(&self) -> &SharingClassifier {
        &self.classifier
    }

    pub fn lock_table(&self) -> &Arc<ItemLockTable> {
        &self.locks
    }

    /// Applies `changes` to `(item, language, version)`.
    ///
    /// With `full_update`, all rows of the item in that language/version are
    /// cleared first and removals become no-ops.
    ///
    /// # Errors
    /// - [`WriteError::InvalidChange`] before anything is locked or written.
    /// - [`WriteError::Store`] for non-transient failures.
    /// - [`WriteError::RetriesExhausted`] when the retry budget is spent.
    pub fn apply_field_changes(
        &self,
        session: &dyn StoreSession,
        item: &ItemDefinition,
        language: &Language,
        version: Version,
        changes: &[FieldChange],
        full_update: bool,
    ) -> WriteResult<WriteOutcome> {
        validate_changes(item.id, changes)?;
        let plan = self.plan(item.id, changes);
        let target = Target {
            item_id: item.id,
            language,
            version,
        };
        let now = self.clock.now_millis();
        let started = Instant::now();

        let result = self.locks.with_item_lock(item.id, || {
            self.run_batch(session, item.id, |tx| {
                apply_plan(tx.fields, &target, &plan.entries, full_update, now)
            })
        });
        let (counts, attempts) = self.log_batch("field_write", item.id, started, result)?;

        self.after_commit(item);
        Ok(WriteOutcome {
            attempts,
            rows_written: counts.rows_written,
            rows_removed: counts.rows_removed,
            skipped_unknown: plan.skipped_unknown,
        })
    }

    /// Saves item properties and field changes in one transaction, then
    /// removes detached blobs and invalidates caches.
    pub fn save_item(
        &self,
        session: &dyn StoreSession,
        changes: &ItemChanges,
    ) -> WriteResult<SaveOutcome> {
        let item_id = changes.item.id;
        validate_changes(item_id, &changes.field_changes)?;
        let plan = self.plan(item_id, &changes.field_changes);
        let target = Target {
            item_id,
            language: &changes.language,
            version: changes.version,
        };
        let now = self.clock.now_millis();
        let started = Instant::now();
        let write_properties = changes.has_properties_changed();
        let write_fields = changes.has_fields_changed();

        let result = self.locks.with_item_lock(item_id, || {
            let batch = if write_properties || write_fields {
                self.run_batch(session, item_id, |tx| {
                    let mut counts = BatchCounts::default();
                    if write_properties {
                        counts.item_updated = tx.items.update_item_definition(
                            &changes.item,
                            &changes.properties,
                            now,
                        )?;
                    }
                    if write_fields {
                        let fields = apply_plan(
                            tx.fields,
                            &target,
                            &plan.entries,
                            changes.full_update,
                            now,
                        )?;
                        counts.rows_written = fields.rows_written;
                        counts.rows_removed = fields.rows_removed;
                    }
                    Ok(counts)
                })
            } else {
                Ok((BatchCounts::default(), 0))
            };
            self.log_batch("item_save", item_id, started, batch)
        });
        let (counts, attempts) = result?;

        // Runs after the item lock is released.
        let removed_blobs = self.remove_detached_blobs(session, item_id, &changes.field_changes);
        self.after_commit(&changes.item);
        Ok(SaveOutcome {
            attempts,
            item_updated: counts.item_updated,
            rows_written: counts.rows_written,
            rows_removed: counts.rows_removed,
            removed_blobs,
        })
    }

    fn plan<'c>(&self, item_id: ItemId, changes: &'c [FieldChange]) -> WritePlan<'c> {
        let mut entries = changes
            .iter()
            .map(|change| (self.classifier.classify_change(change), change))
            .collect::<Vec<_>>();
        // Stable: keeps caller order within one sharing type.
        entries.sort_by_key(|(sharing, _)| write_rank(*sharing));

        let skipped_unknown = entries
            .iter()
            .filter(|(sharing, change)| *sharing == SharingType::Unknown && !change.remove_field)
            .inspect(|(_, change)| {
                warn!(
                    "event=field_write module=field_writer status=skip item_id={} field_id={} reason=unknown_sharing",
                    item_id, change.field_id
                );
            })
            .count();

        WritePlan {
            entries,
            skipped_unknown,
        }
    }

    fn run_batch(
        &self,
        session: &dyn StoreSession,
        item_id: ItemId,
        mut unit: impl FnMut(&TxContext<'_>) -> StoreResult<BatchCounts>,
    ) -> WriteResult<(BatchCounts, u32)> {
        run_with_retry(&self.retry, StoreError::is_transient, |_attempt| {
            let mut counts = BatchCounts::default();
            session.run_in_transaction(&mut |tx| {
                counts = unit(tx)?;
                Ok(())
            })?;
            Ok(counts)
        })
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => WriteError::RetriesExhausted {
                item_id,
                attempts,
                source: last,
            },
            RetryError::Aborted { error, .. } => WriteError::Store {
                item_id,
                source: error,
            },
        })
    }

    fn log_batch(
        &self,
        event: &str,
        item_id: ItemId,
        started: Instant,
        result: WriteResult<(BatchCounts, u32)>,
    ) -> WriteResult<(BatchCounts, u32)> {
        let duration_ms = started.elapsed().as_millis();
        match &result {
            Ok((counts, attempts)) => info!(
                "event={} module=field_writer status=ok item_id={} attempts={} rows_written={} rows_removed={} duration_ms={}",
                event, item_id, attempts, counts.rows_written, counts.rows_removed, duration_ms
            ),
            Err(err) => warn!(
                "event={} module=field_writer status=error item_id={} kind={:?} duration_ms={} error={}",
                event,
                item_id,
                err.kind(),
                duration_ms,
                err
            ),
        }
        result
    }

    fn remove_detached_blobs(
        &self,
        session: &dyn StoreSession,
        item_id: ItemId,
        changes: &[FieldChange],
    ) -> Vec<BlobId> {
        let mut candidates = changes
            .iter()
            .filter_map(FieldChange::detached_blob_id)
            .collect::<Vec<_>>();
        candidates.sort();
        candidates.dedup();

        let mut removed = Vec::new();
        for blob_id in candidates {
            let pattern = format!("%{blob_id}%");
            let mut deleted = false;
            let result = session.run_in_transaction(&mut |tx| {
                deleted = false;
                if !tx.fields.is_blob_referenced(&pattern)? {
                    tx.blobs.remove_blob(blob_id)?;
                    deleted = true;
                }
                Ok(())
            });
            match result {
                Ok(()) if deleted => removed.push(blob_id),
                Ok(()) => {}
                Err(err) => warn!(
                    "event=blob_cleanup module=field_writer status=error item_id={} blob_id={} error={}",
                    item_id, blob_id, err
                ),
            }
        }
        removed
    }

    fn after_commit(&self, item: &ItemDefinition) {
        self.cache.invalidate_prefetch(item.id);
        if item.is_language_definition(self.language_template_id) {
            self.cache.invalidate_language_list();
        }
    }
}

struct WritePlan<'c> {
    entries: Vec<(SharingType, &'c FieldChange)>,
    skipped_unknown: usize,
}

fn write_rank(sharing: SharingType) -> usize {
    SharingType::WRITE_ORDER
        .iter()
        .position(|candidate| *candidate == sharing)
        .unwrap_or(SharingType::WRITE_ORDER.len())
}

fn validate_changes(item_id: ItemId, changes: &[FieldChange]) -> WriteResult<()> {
    for change in changes {
        if let Some(definition) = &change.definition {
            if definition.field_id != change.field_id {
                return Err(WriteError::InvalidChange {
                    item_id,
                    field_id: change.field_id,
                    message: format!("definition belongs to field {}", definition.field_id),
                });
            }
        }
    }
    Ok(())
}

fn apply_plan(
    fields: &dyn PartitionStore,
    target: &Target<'_>,
    entries: &[(SharingType, &FieldChange)],
    full_update: bool,
    now: i64,
) -> StoreResult<BatchCounts> {
    let mut counts = BatchCounts::default();
    if full_update {
        counts.rows_removed += fields.clear_item_version(target.item_id, target.language, target.version)?;
    }

    for (sharing, change) in entries {
        if change.remove_field {
            if full_update {
                continue;
            }
            for partition in sharing.partitions() {
                let scope = FieldScope::for_partition(*partition, target.language, target.version);
                counts.rows_removed += fields.delete_field(target.item_id, change.field_id, &scope)?;
            }
            continue;
        }

        let Some(scope) = FieldScope::for_sharing(*sharing, target.language, target.version) else {
            continue;
        };
        fields.upsert_field(&FieldValue::new(
            target.item_id,
            change.field_id,
            scope,
            change.value.as_str(),
            now,
        ))?;
        counts.rows_written += 1;
    }
    Ok(counts)
}
