//! Per-item exclusive locks.
//!
//! # Responsibility
//! - Serialize writes to one item while writes to different items proceed
//!   in parallel.
//!
//! # Invariants
//! - One lock instance per item id for the lifetime of the table; entries are
//!   created on first use and never removed.
//! - Waiters are served in FIFO order.

use crate::model::field::ItemId;
use parking_lot::{FairMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type ItemLock = Arc<FairMutex<()>>;

/// Lazily populated map from item id to its lock.
#[derive(Debug, Default)]
pub struct ItemLockTable {
    locks: RwLock<HashMap<ItemId, ItemLock>>,
}

impl ItemLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the exclusive lock of `item_id`.
    pub fn with_item_lock<R>(&self, item_id: ItemId, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(item_id);
        let _guard = lock.lock();
        f()
    }

    /// Number of items that ever took a lock.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }

    /// Whether some caller currently holds the lock of `item_id`.
    pub fn is_locked(&self, item_id: ItemId) -> bool {
        self.locks
            .read()
            .get(&item_id)
            .map_or(false, |lock| lock.is_locked())
    }

    fn lock_for(&self, item_id: ItemId) -> ItemLock {
        {
            let locks = self.locks.read();
            if let Some(lock) = locks.get(&item_id) {
                return lock.clone();
            }
        }
        let mut locks = self.locks.write();
        locks
            .entry(item_id)
            .or_insert_with(|| Arc::new(FairMutex::new(())))
            .clone()
    }
}
