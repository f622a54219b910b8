//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate partition store calls into migration and write operations.
//! - Own retry and per-item locking so repositories stay single-attempt.

pub mod field_writer;
pub mod item_lock;
pub mod migration_service;
pub mod retry;
