//! Field sharing migration.
//!
//! # Responsibility
//! - Move one field's rows into the versioned partition when its sharing
//!   changes from shared or unversioned to versioned.
//! - Fan each source row out over the languages and versions the item
//!   already has.
//!
//! # Invariants
//! - A migration runs in one transaction: stale target rows are cleared,
//!   copies are inserted, source rows are deleted, or nothing happens.
//! - Every delete and enumeration is restricted to the requested item scope.
//! - Items without any version to fan out to lose their source row and gain
//!   nothing; they are reported, not rejected. The same holds per language
//!   for unversioned sources.
//! - The partition that is neither source nor target is always cleared.
//! - Versioned rows are cleared only when source rows exist in scope, so
//!   re-running a finished migration keeps the migrated rows.

use crate::model::field::{FieldId, FieldScope, ItemId, Language, Partition};
use crate::repo::error::{StoreError, StoreErrorKind, StoreResult};
use crate::repo::partition_repo::{ItemScope, PartitionStore};
use crate::repo::session::StoreSession;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type MigrationResult<T> = Result<T, MigrationError>;

/// Sharing change a migration implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    SharedToVersioned,
    UnversionedToVersioned,
}

impl MigrationDirection {
    /// Partition the field's rows move out of.
    pub fn source(self) -> Partition {
        match self {
            Self::SharedToVersioned => Partition::SharedFields,
            Self::UnversionedToVersioned => Partition::UnversionedFields,
        }
    }

    /// Partition whose languages an item fans out over.
    fn language_source(self) -> Partition {
        match self {
            Self::SharedToVersioned => Partition::VersionedFields,
            Self::UnversionedToVersioned => Partition::UnversionedFields,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SharedToVersioned => "shared_to_versioned",
            Self::UnversionedToVersioned => "unversioned_to_versioned",
        }
    }
}

impl Display for MigrationDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters of one finished migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub field_id: FieldId,
    pub direction: MigrationDirection,
    pub scope: ItemScope,
    /// Items that held the field in the source partition.
    pub items_migrated: usize,
    pub rows_inserted: usize,
    /// Rows of the field removed from the non-source partitions up front.
    pub stale_rows_cleared: usize,
    pub source_rows_removed: usize,
    /// Items whose source row was removed without any versioned copy.
    pub items_without_fanout: Vec<ItemId>,
    /// Unversioned source values removed without a copy because the item has
    /// no version in that language.
    pub languages_without_fanout: Vec<(ItemId, Language)>,
}

impl MigrationReport {
    fn empty(field_id: FieldId, direction: MigrationDirection, scope: ItemScope) -> Self {
        Self {
            field_id,
            direction,
            scope,
            items_migrated: 0,
            rows_inserted: 0,
            stale_rows_cleared: 0,
            source_rows_removed: 0,
            items_without_fanout: Vec::new(),
            languages_without_fanout: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct MigrationError {
    pub field_id: FieldId,
    pub direction: MigrationDirection,
    pub source: StoreError,
}

impl MigrationError {
    pub fn kind(&self) -> StoreErrorKind {
        self.source.kind()
    }
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "migration {} of field {} failed: {}",
            self.direction, self.field_id, self.source
        )
    }
}

impl Error for MigrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// One migration strategy. Runs against an already open transaction.
pub trait FieldMigration {
    fn direction(&self) -> MigrationDirection;

    fn migrate(
        &self,
        store: &dyn PartitionStore,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<MigrationReport>;
}

/// Shared → versioned: one copy per language and version present in the
/// item's versioned rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedToVersioned;

impl FieldMigration for SharedToVersioned {
    fn direction(&self) -> MigrationDirection {
        MigrationDirection::SharedToVersioned
    }

    fn migrate(
        &self,
        store: &dyn PartitionStore,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<MigrationReport> {
        run_fanout(store, self.direction(), field_id, scope)
    }
}

/// Unversioned → versioned: each language row is copied to every version the
/// item has in that language.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnversionedToVersioned;

impl FieldMigration for UnversionedToVersioned {
    fn direction(&self) -> MigrationDirection {
        MigrationDirection::UnversionedToVersioned
    }

    fn migrate(
        &self,
        store: &dyn PartitionStore,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<MigrationReport> {
        run_fanout(store, self.direction(), field_id, scope)
    }
}

fn run_fanout(
    store: &dyn PartitionStore,
    direction: MigrationDirection,
    field_id: FieldId,
    scope: ItemScope,
) -> StoreResult<MigrationReport> {
    let source = direction.source();
    let mut report = MigrationReport::empty(field_id, direction, scope);

    for partition in Partition::ALL
        .into_iter()
        .filter(|p| *p != source && *p != Partition::VersionedFields)
    {
        report.stale_rows_cleared += store.delete_field_in_scope(partition, field_id, scope)?;
    }

    let item_ids = store.distinct_items_with_field(source, field_id, scope)?;
    if item_ids.is_empty() {
        return Ok(report);
    }
    report.stale_rows_cleared +=
        store.delete_field_in_scope(Partition::VersionedFields, field_id, scope)?;

    report.items_migrated = item_ids.len();
    for item_id in item_ids {
        let fan_out = fan_out_item(store, direction, field_id, item_id)?;
        if fan_out.inserted == 0 {
            report.items_without_fanout.push(item_id);
        }
        report.rows_inserted += fan_out.inserted;
        report.languages_without_fanout.extend(
            fan_out
                .dropped_languages
                .into_iter()
                .map(|language| (item_id, language)),
        );
    }

    report.source_rows_removed = store.delete_field_in_scope(source, field_id, scope)?;
    Ok(report)
}

#[derive(Debug, Default)]
struct ItemFanOut {
    inserted: usize,
    dropped_languages: Vec<Language>,
}

fn fan_out_item(
    store: &dyn PartitionStore,
    direction: MigrationDirection,
    field_id: FieldId,
    item_id: ItemId,
) -> StoreResult<ItemFanOut> {
    let languages: Vec<Language> =
        store.distinct_languages(direction.language_source(), item_id)?;
    let mut fan_out = ItemFanOut::default();
    for language in languages {
        let versions = store.distinct_versions(item_id, &language)?;
        if versions.is_empty() {
            // Only unversioned sources can name a language without versions.
            let scope = FieldScope::Unversioned {
                language: language.clone(),
            };
            if direction == MigrationDirection::UnversionedToVersioned
                && store.get_field(item_id, field_id, &scope)?.is_some()
            {
                fan_out.dropped_languages.push(language);
            }
            continue;
        }
        for version in versions {
            fan_out.inserted +=
                store.copy_to_versioned(direction.source(), item_id, field_id, &language, version)?;
        }
    }
    Ok(fan_out)
}

/// Runs `migration` for `field_id` in one transaction.
///
/// `root_item_id` restricts the migration to that item and its descendants;
/// `None` migrates the whole store.
///
/// # Errors
/// - [`MigrationError`] carrying the failing store error; nothing is
///   committed.
pub fn migrate_field(
    session: &dyn StoreSession,
    migration: &dyn FieldMigration,
    field_id: FieldId,
    root_item_id: Option<ItemId>,
) -> MigrationResult<MigrationReport> {
    let direction = migration.direction();
    let scope = ItemScope::from_root(root_item_id);
    let started = Instant::now();
    info!(
        "event=field_migration module=migration status=start field_id={} direction={} scope={}",
        field_id, direction, scope
    );

    let mut report = MigrationReport::empty(field_id, direction, scope);
    let result = session.run_in_transaction(&mut |tx| {
        report = migration.migrate(tx.fields, field_id, scope)?;
        Ok(())
    });

    if let Err(source) = result {
        warn!(
            "event=field_migration module=migration status=error field_id={} direction={} kind={:?} duration_ms={} error={}",
            field_id,
            direction,
            source.kind(),
            started.elapsed().as_millis(),
            source
        );
        return Err(MigrationError {
            field_id,
            direction,
            source,
        });
    }

    for item_id in &report.items_without_fanout {
        warn!(
            "event=field_migration module=migration status=no_fanout field_id={} item_id={} direction={}",
            field_id, item_id, direction
        );
    }
    for (item_id, language) in &report.languages_without_fanout {
        warn!(
            "event=field_migration module=migration status=no_fanout field_id={} item_id={} language={} direction={}",
            field_id, item_id, language, direction
        );
    }
    info!(
        "event=field_migration module=migration status=ok field_id={} direction={} items={} inserted={} stale_cleared={} source_removed={} duration_ms={}",
        field_id,
        direction,
        report.items_migrated,
        report.rows_inserted,
        report.stale_rows_cleared,
        report.source_rows_removed,
        started.elapsed().as_millis()
    );
    Ok(report)
}

pub fn migrate_to_versioned_from_shared(
    session: &dyn StoreSession,
    field_id: FieldId,
    root_item_id: Option<ItemId>,
) -> MigrationResult<MigrationReport> {
    migrate_field(session, &SharedToVersioned, field_id, root_item_id)
}

pub fn migrate_to_versioned_from_unversioned(
    session: &dyn StoreSession,
    field_id: FieldId,
    root_item_id: Option<ItemId>,
) -> MigrationResult<MigrationReport> {
    migrate_field(session, &UnversionedToVersioned, field_id, root_item_id)
}
