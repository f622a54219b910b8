//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for field partitions, items and blobs.
//! - Isolate SQLite query details from migration and write orchestration.
//!
//! # Invariants
//! - Engine failures are classified into `StoreError` at this boundary.
//! - Mutations run inside a `StoreSession` unit of work.

pub mod blob_repo;
pub mod error;
pub mod item_repo;
pub mod partition_repo;
pub mod session;
