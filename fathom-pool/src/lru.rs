//! LRU table of shard queues with a veto-aware eviction predicate.
//!
//! Unlike a plain capacity-bound cache, inserting past capacity walks
//! the table from the least-recently-used end and drops the first
//! queue that is safe to drop: not persistent, state `Free`, and with
//! every live handle parked. Busy queues are renewed instead, so the
//! table may temporarily exceed its nominal capacity under load.

use crate::shard_queue::ShardQueue;
use lru::LruCache;
use std::sync::Arc;

/// LRU table keyed by endpoint-set fingerprint.
pub struct DatabasesLRU {
    cache: LruCache<u64, Arc<ShardQueue>>,
    capacity: usize,
}

impl DatabasesLRU {
    /// Create a table with the given nominal capacity.
    pub fn new(capacity: usize) -> Self {
        DatabasesLRU {
            cache: LruCache::unbounded(),
            capacity: capacity.max(1),
        }
    }

    /// Number of queues currently held
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.cache.len() == 0
    }

    /// Look up a queue, renewing its recency.
    pub fn get(&mut self, hash: u64) -> Option<Arc<ShardQueue>> {
        self.cache.get(&hash).cloned()
    }

    /// Look up or create the queue for `hash`.
    ///
    /// When the insert pushes the table past capacity, the oldest
    /// droppable queue is evicted and returned so the caller can
    /// unregister it; queues that are persistent, mid-switch or have
    /// handles checked out are renewed instead.
    pub fn get_or_insert(
        &mut self,
        hash: u64,
        make: impl FnOnce() -> Arc<ShardQueue>,
    ) -> (Arc<ShardQueue>, Option<Arc<ShardQueue>>) {
        if let Some(queue) = self.cache.get(&hash) {
            return (queue.clone(), None);
        }
        let queue = make();
        self.cache.push(hash, queue.clone());

        let mut evicted = None;
        if self.cache.len() > self.capacity {
            // Oldest first; the entry just inserted is the newest.
            let victim = self
                .cache
                .iter()
                .rev()
                .find(|(k, q)| **k != hash && q.droppable())
                .map(|(k, _)| *k);
            if let Some(key) = victim {
                evicted = self.cache.pop(&key);
            }
        }
        (queue, evicted)
    }

    /// Remove a queue outright.
    pub fn remove(&mut self, hash: u64) -> Option<Arc<ShardQueue>> {
        self.cache.pop(&hash)
    }

    /// Iterate all queues (most recent first).
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ShardQueue>> {
        self.cache.iter().map(|(_, q)| q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::{Endpoint, Endpoints};

    fn make_queue(name: &str, persistent: bool) -> Arc<ShardQueue> {
        Arc::new(ShardQueue::new(
            Endpoints::single(Endpoint::new(name)),
            false,
            persistent,
            4,
        ))
    }

    #[test]
    fn test_fill_past_capacity_drops_oldest_idle() {
        let mut table = DatabasesLRU::new(2);
        for name in ["a", "b", "c"] {
            let eps = Endpoints::single(Endpoint::new(name));
            let (_, evicted) = table.get_or_insert(eps.hash(), || make_queue(name, false));
            if name == "c" {
                // "a" is the oldest idle queue
                let evicted = evicted.expect("one queue dropped");
                assert_eq!(evicted.endpoints.get(0).unwrap().path(), "a");
            } else {
                assert!(evicted.is_none());
            }
        }
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_persistent_queues_are_renewed_not_dropped() {
        let mut table = DatabasesLRU::new(1);
        let a = Endpoints::single(Endpoint::new("a"));
        let b = Endpoints::single(Endpoint::new("b"));
        table.get_or_insert(a.hash(), || make_queue("a", true));
        let (_, evicted) = table.get_or_insert(b.hash(), || make_queue("b", false));
        // The persistent queue survives; the table grows past capacity
        assert!(evicted.is_none());
        assert_eq!(table.len(), 2);
        assert!(table.get(a.hash()).is_some());
    }

    #[test]
    fn test_get_renews_recency() {
        let mut table = DatabasesLRU::new(2);
        let a = Endpoints::single(Endpoint::new("a"));
        let b = Endpoints::single(Endpoint::new("b"));
        let c = Endpoints::single(Endpoint::new("c"));
        table.get_or_insert(a.hash(), || make_queue("a", false));
        table.get_or_insert(b.hash(), || make_queue("b", false));
        // Touch "a" so "b" becomes the eviction candidate
        table.get(a.hash());
        let (_, evicted) = table.get_or_insert(c.hash(), || make_queue("c", false));
        assert_eq!(
            evicted.unwrap().endpoints.get(0).unwrap().path(),
            "b"
        );
    }
}
