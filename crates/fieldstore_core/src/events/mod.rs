//! Event queue shared between store instances.
//!
//! # Responsibility
//! - Append and read cross-instance events in stamp order.
//! - Expire old events with minute-based retention.

pub mod queue;

pub use queue::{EventQueue, EventQueueQuery, NewEvent, QueuedEvent, SqliteEventQueue};
