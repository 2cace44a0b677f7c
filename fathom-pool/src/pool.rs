//! The process-wide shard pool.

use crate::lru::DatabasesLRU;
use crate::shard::{OpenFlags, Shard};
use crate::shard_queue::ShardQueue;
use fathom_core::{BackendFactory, Endpoint, Endpoints, Error, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Endpoint of the master bookkeeping database holding reference
/// counts for persistent writable shards.
const REFS_ENDPOINT: &str = ".refs";

struct PoolInner {
    /// Reverse lookup: single-endpoint fingerprint -> queues serving it
    queues: FxHashMap<u64, Vec<Arc<ShardQueue>>>,
    /// Read-only shard queues
    databases: DatabasesLRU,
    /// Writable shard queues
    writable_databases: DatabasesLRU,
}

impl PoolInner {
    fn register(&mut self, queue: &Arc<ShardQueue>) {
        for endpoint in &queue.endpoints {
            let entry = self.queues.entry(endpoint.hash()).or_default();
            if !entry.iter().any(|q| Arc::ptr_eq(q, queue)) {
                entry.push(queue.clone());
            }
        }
    }

    fn unregister(&mut self, queue: &Arc<ShardQueue>) {
        for endpoint in &queue.endpoints {
            if let Some(entry) = self.queues.get_mut(&endpoint.hash()) {
                entry.retain(|q| !Arc::ptr_eq(q, queue));
                if entry.is_empty() {
                    self.queues.remove(&endpoint.hash());
                }
            }
        }
    }
}

/// Process-wide registry of [`ShardQueue`]s with LRU capping and
/// reference counting of persistent writable shards.
pub struct DatabasePool {
    inner: Mutex<PoolInner>,
    factory: Arc<dyn BackendFactory>,
    finished: AtomicBool,
    /// Maximum parked handles per readable queue
    max_handles: usize,
}

impl DatabasePool {
    /// Create a pool over a backend factory.
    ///
    /// `max_queues` caps each LRU table; `max_handles` caps the live
    /// handles of each readable queue (writable queues always hold
    /// exactly one).
    pub fn new(factory: Arc<dyn BackendFactory>, max_queues: usize, max_handles: usize) -> Self {
        DatabasePool {
            inner: Mutex::new(PoolInner {
                queues: FxHashMap::default(),
                databases: DatabasesLRU::new(max_queues),
                writable_databases: DatabasesLRU::new(max_queues),
            }),
            factory,
            finished: AtomicBool::new(false),
            max_handles: max_handles.max(1),
        }
    }

    /// The backend factory this pool opens shards through.
    pub fn factory(&self) -> &Arc<dyn BackendFactory> {
        &self.factory
    }

    /// Check out a shard handle for an endpoint set.
    ///
    /// Writable checkouts are exclusive per queue; expiry of `timeout`
    /// returns [`Error::Timeout`] without disturbing queue state.
    pub fn checkout(
        self: &Arc<Self>,
        endpoints: &Endpoints,
        flags: OpenFlags,
        timeout: Duration,
    ) -> Result<ShardHandle> {
        if self.finished.load(Ordering::Acquire) {
            return Err(Error::conflict("pool is shutting down"));
        }
        if endpoints.is_empty() {
            return Err(Error::client("no endpoints to check out"));
        }

        let writable = flags.contains(OpenFlags::WRITABLE);
        let hash = endpoints.hash();

        let queue = {
            let mut inner = self.inner.lock();
            let max_handles = self.max_handles;
            let table = if writable {
                &mut inner.writable_databases
            } else {
                &mut inner.databases
            };
            let (queue, evicted) = table.get_or_insert(hash, || {
                Arc::new(ShardQueue::new(
                    endpoints.clone(),
                    writable,
                    flags.contains(OpenFlags::PERSISTENT),
                    max_handles,
                ))
            });
            if let Some(evicted) = evicted {
                debug!(endpoints = %evicted.endpoints, "dropping idle shard queue");
                inner.unregister(&evicted);
            }
            inner.register(&queue);
            queue
        };

        if flags.contains(OpenFlags::INIT_REF) {
            self.init_ref(endpoints)?;
        }

        let deadline = Instant::now() + timeout;
        let factory = self.factory.clone();
        let eps = endpoints.clone();
        let shard = queue.checkout(deadline, move || Shard::open(&*factory, &eps, flags))?;

        Ok(ShardHandle {
            shard: Some(shard),
            queue,
            pool: self.clone(),
        })
    }

    /// Explicitly return a handle (dropping it does the same).
    pub fn checkin(&self, mut handle: ShardHandle) {
        if let Some(shard) = handle.shard.take() {
            handle.queue.checkin(shard);
        }
    }

    /// Atomically swap the databases behind an endpoint (replication
    /// handover). Blocks new checkouts on the affected queues until
    /// every outstanding handle is returned.
    pub fn switch_db(&self, endpoint: &Endpoint, timeout: Duration) -> Result<()> {
        let queues: Vec<Arc<ShardQueue>> = {
            let inner = self.inner.lock();
            inner
                .queues
                .get(&endpoint.hash())
                .map(|qs| qs.to_vec())
                .unwrap_or_default()
        };
        if queues.is_empty() {
            return Err(Error::not_found(format!("no open shard for {}", endpoint)));
        }
        let deadline = Instant::now() + timeout;
        for queue in queues {
            queue.switch(&*self.factory, deadline)?;
        }
        Ok(())
    }

    fn refs_key(endpoints: &Endpoints) -> String {
        format!("ref:{}", endpoints)
    }

    fn master(&self) -> Result<Arc<dyn fathom_core::Backend>> {
        self.factory.open(&Endpoint::new(REFS_ENDPOINT), true, true)
    }

    fn read_ref(master: &dyn fathom_core::Backend, key: &str) -> Result<u64> {
        Ok(master
            .get_metadata(key)?
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    /// Create the reference counter for a persistent writable shard.
    pub fn init_ref(&self, endpoints: &Endpoints) -> Result<()> {
        let master = self.master()?;
        let key = Self::refs_key(endpoints);
        if master.get_metadata(&key)?.is_none() {
            master.set_metadata(&key, b"1")?;
        }
        Ok(())
    }

    /// Increment the reference counter.
    pub fn inc_ref(&self, endpoints: &Endpoints) -> Result<u64> {
        let master = self.master()?;
        let key = Self::refs_key(endpoints);
        let count = Self::read_ref(&*master, &key)? + 1;
        master.set_metadata(&key, count.to_string().as_bytes())?;
        Ok(count)
    }

    /// Decrement the reference counter; zero allows dropping the shard.
    pub fn dec_ref(&self, endpoints: &Endpoints) -> Result<u64> {
        let master = self.master()?;
        let key = Self::refs_key(endpoints);
        let count = Self::read_ref(&*master, &key)?.saturating_sub(1);
        master.set_metadata(&key, count.to_string().as_bytes())?;
        Ok(count)
    }

    /// The current reference count of a persistent writable shard.
    pub fn get_ref(&self, endpoints: &Endpoints) -> Result<u64> {
        let master = self.master()?;
        Self::read_ref(&*master, &Self::refs_key(endpoints))
    }

    /// Shutdown gate: fail pending and future checkouts on every queue.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        let inner = self.inner.lock();
        for queue in inner
            .databases
            .iter()
            .chain(inner.writable_databases.iter())
        {
            queue.finish();
        }
    }

    /// Whether the pool has been shut down.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// A checked-out shard. Dropping the handle checks it back in.
pub struct ShardHandle {
    shard: Option<Shard>,
    queue: Arc<ShardQueue>,
    pool: Arc<DatabasePool>,
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle")
            .field("hash", &self.queue.hash)
            .finish()
    }
}

impl ShardHandle {
    /// The queue this handle belongs to.
    pub fn queue(&self) -> &Arc<ShardQueue> {
        &self.queue
    }

    /// The pool this handle came from.
    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }
}

impl Deref for ShardHandle {
    type Target = Shard;

    fn deref(&self) -> &Shard {
        self.shard.as_ref().expect("handle already checked in")
    }
}

impl DerefMut for ShardHandle {
    fn deref_mut(&mut self) -> &mut Shard {
        self.shard.as_mut().expect("handle already checked in")
    }
}

impl Drop for ShardHandle {
    fn drop(&mut self) {
        if let Some(shard) = self.shard.take() {
            self.queue.checkin(shard);
        }
    }
}
