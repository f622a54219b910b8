//! Domain model for partitioned item field storage.
//!
//! # Responsibility
//! - Define identifiers and partition key types.
//! - Define item/field metadata and save change sets consumed by services.
//!
//! # Invariants
//! - A field row belongs to exactly one `Partition`.
//! - Metadata types are read-only inputs; core never derives templates.

pub mod field;
pub mod item;
