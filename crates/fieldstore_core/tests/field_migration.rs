mod common;

use common::{
    field_rows, item_rows, lang, open_memory_store, seed_rows, shared_row, unversioned_row,
    versioned_row, InstrumentedSession, Probe,
};
use fieldstore_core::{
    migrate_field, migrate_to_versioned_from_shared, migrate_to_versioned_from_unversioned,
    FieldScope, ItemDefinition, ItemScope, MigrationDirection, Partition, SharedToVersioned,
    SqliteSession, StoreErrorKind, StoreSession, TxContext,
};
use uuid::Uuid;

fn versioned_keys(session: &dyn StoreSession, field_id: Uuid, item_id: Uuid) -> Vec<(String, i64, String)> {
    let mut keys = field_rows(session, field_id, Partition::VersionedFields)
        .into_iter()
        .filter(|row| row.item_id == item_id)
        .map(|row| match row.scope {
            FieldScope::Versioned { language, version } => {
                (language.to_string(), version.number(), row.value)
            }
            other => panic!("unexpected scope {other:?}"),
        })
        .collect::<Vec<_>>();
    keys.sort();
    keys
}

#[test]
fn shared_field_fans_out_over_existing_languages_and_versions() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let item_id = Uuid::new_v4();
    let field_id = Uuid::new_v4();
    let sibling_field = Uuid::new_v4();

    seed_rows(
        &session,
        &[
            shared_row(item_id, field_id, "shared value"),
            versioned_row(item_id, sibling_field, "en", 1, "a"),
            versioned_row(item_id, sibling_field, "en", 2, "b"),
            versioned_row(item_id, sibling_field, "de", 1, "c"),
            versioned_row(item_id, sibling_field, "de", 2, "d"),
            // Stale leftovers of an earlier sharing change.
            versioned_row(item_id, field_id, "en", 1, "stale"),
            unversioned_row(item_id, field_id, "en", "stale"),
        ],
    );

    let report = migrate_to_versioned_from_shared(&session, field_id, None).unwrap();

    assert_eq!(report.direction, MigrationDirection::SharedToVersioned);
    assert_eq!(report.scope, ItemScope::All);
    assert_eq!(report.items_migrated, 1);
    assert_eq!(report.rows_inserted, 4);
    assert_eq!(report.stale_rows_cleared, 2);
    assert_eq!(report.source_rows_removed, 1);
    assert!(report.items_without_fanout.is_empty());

    assert!(field_rows(&session, field_id, Partition::SharedFields).is_empty());
    assert!(field_rows(&session, field_id, Partition::UnversionedFields).is_empty());
    let shared_value = "shared value".to_string();
    assert_eq!(
        versioned_keys(&session, field_id, item_id),
        vec![
            ("de".to_string(), 1, shared_value.clone()),
            ("de".to_string(), 2, shared_value.clone()),
            ("en".to_string(), 1, shared_value.clone()),
            ("en".to_string(), 2, shared_value),
        ]
    );
    assert_eq!(item_rows(&session, item_id, Partition::VersionedFields).len(), 8);
}

#[test]
fn item_without_versions_loses_shared_row_without_copies() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let bare_item = Uuid::new_v4();
    let versioned_item = Uuid::new_v4();
    let field_id = Uuid::new_v4();

    seed_rows(
        &session,
        &[
            shared_row(bare_item, field_id, "orphaned"),
            shared_row(versioned_item, field_id, "kept"),
            versioned_row(versioned_item, Uuid::new_v4(), "en", 1, "x"),
        ],
    );

    let report = migrate_to_versioned_from_shared(&session, field_id, None).unwrap();

    assert_eq!(report.items_migrated, 2);
    assert_eq!(report.rows_inserted, 1);
    assert_eq!(report.source_rows_removed, 2);
    assert_eq!(report.items_without_fanout, vec![bare_item]);
    assert!(item_rows(&session, bare_item, Partition::SharedFields).is_empty());
    assert!(item_rows(&session, bare_item, Partition::VersionedFields).is_empty());
    assert_eq!(versioned_keys(&session, field_id, versioned_item).len(), 1);
}

#[test]
fn unversioned_field_fans_out_per_language() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let item_id = Uuid::new_v4();
    let field_id = Uuid::new_v4();
    let sibling_field = Uuid::new_v4();

    seed_rows(
        &session,
        &[
            unversioned_row(item_id, field_id, "en", "hello"),
            unversioned_row(item_id, field_id, "de", "hallo"),
            versioned_row(item_id, sibling_field, "en", 1, "a"),
            versioned_row(item_id, sibling_field, "en", 2, "b"),
            versioned_row(item_id, sibling_field, "de", 1, "c"),
            shared_row(item_id, field_id, "stale"),
        ],
    );

    let report = migrate_to_versioned_from_unversioned(&session, field_id, None).unwrap();

    assert_eq!(report.direction, MigrationDirection::UnversionedToVersioned);
    assert_eq!(report.rows_inserted, 3);
    assert_eq!(report.stale_rows_cleared, 1);
    assert_eq!(report.source_rows_removed, 2);
    assert_eq!(
        versioned_keys(&session, field_id, item_id),
        vec![
            ("de".to_string(), 1, "hallo".to_string()),
            ("en".to_string(), 1, "hello".to_string()),
            ("en".to_string(), 2, "hello".to_string()),
        ]
    );
    assert!(field_rows(&session, field_id, Partition::SharedFields).is_empty());
    assert!(field_rows(&session, field_id, Partition::UnversionedFields).is_empty());
}

#[test]
fn root_item_limits_migration_to_its_subtree() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let template = Uuid::new_v4();
    let root = ItemDefinition::new(Uuid::new_v4(), "root", template);
    let child = ItemDefinition::new(Uuid::new_v4(), "child", template).with_parent(root.id);
    let outsider = ItemDefinition::new(Uuid::new_v4(), "outsider", template);
    let field_id = Uuid::new_v4();

    session
        .run_in_transaction(&mut |tx: &TxContext<'_>| {
            for item in [&root, &child, &outsider] {
                tx.items.create_item(item, common::T0)?;
                tx.fields.upsert_field(&shared_row(item.id, field_id, "v"))?;
                tx.fields
                    .upsert_field(&versioned_row(item.id, Uuid::new_v4(), "en", 1, "x"))?;
            }
            // Stale row outside the subtree must survive the scoped clear.
            tx.fields
                .upsert_field(&unversioned_row(outsider.id, field_id, "en", "stale"))
        })
        .unwrap();

    let report = migrate_field(&session, &SharedToVersioned, field_id, Some(root.id)).unwrap();

    assert_eq!(report.scope, ItemScope::Subtree(root.id));
    assert_eq!(report.items_migrated, 2);
    assert_eq!(report.rows_inserted, 2);
    assert_eq!(report.stale_rows_cleared, 0);
    assert_eq!(
        field_rows(&session, field_id, Partition::SharedFields)
            .into_iter()
            .map(|row| row.item_id)
            .collect::<Vec<_>>(),
        vec![outsider.id]
    );
    assert_eq!(item_rows(&session, outsider.id, Partition::UnversionedFields).len(), 1);
    assert!(versioned_keys(&session, field_id, outsider.id).is_empty());
}

#[test]
fn finished_migration_is_not_undone_by_a_rerun() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let item_id = Uuid::new_v4();
    let field_id = Uuid::new_v4();
    seed_rows(
        &session,
        &[
            shared_row(item_id, field_id, "v"),
            versioned_row(item_id, Uuid::new_v4(), "en", 1, "x"),
        ],
    );

    let first = migrate_to_versioned_from_shared(&session, field_id, None).unwrap();
    let second = migrate_to_versioned_from_shared(&session, field_id, None).unwrap();

    assert_eq!(first.rows_inserted, 1);
    assert_eq!(second.items_migrated, 0);
    assert_eq!(second.stale_rows_cleared, 0);
    assert_eq!(versioned_keys(&session, field_id, item_id).len(), 1);
}

#[test]
fn rerun_without_source_rows_still_clears_the_other_partition() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let item_id = Uuid::new_v4();
    let field_id = Uuid::new_v4();
    seed_rows(
        &session,
        &[
            unversioned_row(item_id, field_id, "en", "stale"),
            versioned_row(item_id, field_id, "en", 1, "migrated"),
        ],
    );

    let report = migrate_to_versioned_from_shared(&session, field_id, None).unwrap();

    assert_eq!(report.items_migrated, 0);
    assert_eq!(report.stale_rows_cleared, 1);
    assert!(field_rows(&session, field_id, Partition::UnversionedFields).is_empty());
    assert_eq!(
        versioned_keys(&session, field_id, item_id),
        vec![("en".to_string(), 1, "migrated".to_string())]
    );
}

#[test]
fn unversioned_language_without_versions_is_reported() {
    let (config, conn) = open_memory_store();
    let session = SqliteSession::try_new(&conn, config.dialect()).unwrap();
    let item_id = Uuid::new_v4();
    let field_id = Uuid::new_v4();
    let sibling_field = Uuid::new_v4();
    seed_rows(
        &session,
        &[
            unversioned_row(item_id, field_id, "en", "hello"),
            unversioned_row(item_id, field_id, "de", "hallo"),
            versioned_row(item_id, sibling_field, "en", 1, "a"),
            versioned_row(item_id, sibling_field, "en", 2, "b"),
        ],
    );

    let report = migrate_to_versioned_from_unversioned(&session, field_id, None).unwrap();

    assert_eq!(report.rows_inserted, 2);
    assert!(report.items_without_fanout.is_empty());
    assert_eq!(report.languages_without_fanout, vec![(item_id, lang("de"))]);
    assert_eq!(report.source_rows_removed, 2);
    assert!(field_rows(&session, field_id, Partition::UnversionedFields).is_empty());
    assert_eq!(
        versioned_keys(&session, field_id, item_id),
        vec![
            ("en".to_string(), 1, "hello".to_string()),
            ("en".to_string(), 2, "hello".to_string()),
        ]
    );
}

#[test]
fn failed_migration_leaves_store_untouched_and_can_be_rerun() {
    let (config, conn) = open_memory_store();
    let probe = Probe::new();
    let session = InstrumentedSession::new(&conn, &config, probe.clone());
    let item_id = Uuid::new_v4();
    let field_id = Uuid::new_v4();
    seed_rows(
        &session,
        &[
            shared_row(item_id, field_id, "v"),
            versioned_row(item_id, field_id, "en", 1, "stale"),
            versioned_row(item_id, Uuid::new_v4(), "en", 2, "x"),
        ],
    );

    probe.fail_with_constraint(1);
    let err = migrate_to_versioned_from_shared(&session, field_id, None).unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::ConstraintViolation);
    assert_eq!(err.field_id, field_id);
    assert_eq!(item_rows(&session, item_id, Partition::SharedFields).len(), 1);
    assert_eq!(
        versioned_keys(&session, field_id, item_id),
        vec![("en".to_string(), 1, "stale".to_string())]
    );

    let report = migrate_to_versioned_from_shared(&session, field_id, None).unwrap();
    assert_eq!(report.rows_inserted, 1);
    assert_eq!(
        versioned_keys(&session, field_id, item_id),
        vec![("en".to_string(), 2, "v".to_string())]
    );
}
