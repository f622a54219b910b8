//! Cache invalidation hooks called after a save commits.

use crate::model::field::ItemId;

/// Receives cache invalidations for saved items.
///
/// Implementations must be cheap and must not fail; they run after the save
/// transaction committed.
pub trait CacheInvalidator: Send + Sync {
    /// Drops prefetched field data of one item.
    fn invalidate_prefetch(&self, item_id: ItemId);
    /// Drops the process-wide language list.
    fn invalidate_language_list(&self);
}

/// Invalidator for stores without caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheInvalidator;

impl CacheInvalidator for NoopCacheInvalidator {
    fn invalidate_prefetch(&self, _item_id: ItemId) {}

    fn invalidate_language_list(&self) {}
}
