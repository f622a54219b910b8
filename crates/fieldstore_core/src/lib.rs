//! Core domain logic for the field partition store.
//! This crate owns field sharing classification, sharing migration and
//! versioned field writes over SQLite.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod events;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sharing;

pub use cache::{CacheInvalidator, NoopCacheInvalidator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, StoreConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult, IdentifierQuoting, SqlDialect};
pub use events::{EventQueue, EventQueueQuery, NewEvent, QueuedEvent, SqliteEventQueue};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::field::{
    BlobId, FieldId, FieldScope, FieldValidationError, FieldValue, ItemId, Language, Partition,
    SharingType, TemplateId, Version,
};
pub use model::item::{
    FieldChange, FieldDefinition, ItemChanges, ItemDefinition, ItemPropertyChanges,
    LANGUAGE_TEMPLATE_ID,
};
pub use repo::blob_repo::{BlobRemover, SqliteBlobRepository};
pub use repo::error::{StoreError, StoreErrorKind, StoreResult};
pub use repo::item_repo::{ItemStore, SqliteItemRepository};
pub use repo::partition_repo::{ItemScope, PartitionStore, SqlitePartitionStore};
pub use repo::session::{SqliteSession, StoreSession, TxContext};
pub use service::field_writer::{
    ItemFieldWriter, SaveOutcome, WriteError, WriteOutcome, WriteResult,
};
pub use service::item_lock::ItemLockTable;
pub use service::migration_service::{
    migrate_field, migrate_to_versioned_from_shared, migrate_to_versioned_from_unversioned,
    FieldMigration, MigrationDirection, MigrationError, MigrationReport, MigrationResult,
    SharedToVersioned, UnversionedToVersioned,
};
pub use service::retry::{run_with_retry, Backoff, RetryError, RetryPolicy};
pub use sharing::{DefaultSharingRegistry, SharingClassifier};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
