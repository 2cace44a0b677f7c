//! A shard handle: one open view onto the backends of an endpoint set.

use bitflags::bitflags;
use fathom_core::endpoint::shard_of;
use fathom_core::{Backend, BackendFactory, Endpoints, Error, Result};
use std::sync::Arc;
use std::time::Instant;

bitflags! {
    /// Checkout flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open as writable (exclusive per queue)
        const WRITABLE = 1;
        /// Create the underlying database if it does not exist
        const SPAWN = 2;
        /// Keep the queue in the pool regardless of LRU pressure
        const PERSISTENT = 4;
        /// Initialise the reference counter in the master database
        const INIT_REF = 8;
        /// Drop the handle on checkin instead of queueing it
        const VOLATILE = 16;
        /// Gate writable pops on replication state
        const REPLICATION = 32;
    }
}

/// One reusable handle over the backend connections of an endpoint set.
///
/// The handle owns exactly one connection per endpoint; it is created
/// on first checkout and reused until LRU pressure or a `VOLATILE`
/// checkin drops it.
pub struct Shard {
    endpoints: Endpoints,
    flags: OpenFlags,
    backends: Vec<Arc<dyn Backend>>,
    /// Fingerprint of the endpoint set
    pub hash: u64,
    /// Last checkout time
    pub access_time: Instant,
    /// Whether this handle has written since its last commit
    pub modified: bool,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("hash", &self.hash)
            .field("flags", &self.flags)
            .field("modified", &self.modified)
            .finish()
    }
}

impl Shard {
    /// Open connections for every endpoint of the set.
    pub fn open(
        factory: &dyn BackendFactory,
        endpoints: &Endpoints,
        flags: OpenFlags,
    ) -> Result<Shard> {
        if endpoints.is_empty() {
            return Err(Error::client("no endpoints to open"));
        }
        let writable = flags.contains(OpenFlags::WRITABLE);
        let create = flags.contains(OpenFlags::SPAWN);
        let mut backends = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            backends.push(factory.open(endpoint, writable, create)?);
        }
        Ok(Shard {
            endpoints: endpoints.clone(),
            flags,
            backends,
            hash: endpoints.hash(),
            access_time: Instant::now(),
            modified: false,
        })
    }

    /// The endpoint set this handle serves
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The checkout flags this handle was opened with
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Whether the handle is writable
    pub fn is_writable(&self) -> bool {
        self.flags.contains(OpenFlags::WRITABLE)
    }

    /// Number of physical shards behind the handle
    pub fn shard_count(&self) -> usize {
        self.backends.len()
    }

    /// The backend of physical shard `i`
    pub fn backend(&self, i: usize) -> Option<&Arc<dyn Backend>> {
        self.backends.get(i)
    }

    /// The backend a prefixed id term routes to
    pub fn backend_for_term(&self, term_id: &[u8]) -> &Arc<dyn Backend> {
        &self.backends[shard_of(term_id, self.backends.len())]
    }

    /// Index of the shard a prefixed id term routes to
    pub fn shard_for_term(&self, term_id: &[u8]) -> usize {
        shard_of(term_id, self.backends.len())
    }

    /// Best-effort document count of physical shard `i`
    pub fn doccount(&self, i: usize) -> Option<u64> {
        self.backends.get(i).and_then(|b| b.doccount().ok())
    }

    /// Total document count across all physical shards
    pub fn total_doccount(&self) -> u64 {
        self.backends
            .iter()
            .filter_map(|b| b.doccount().ok())
            .sum()
    }

    /// Replace the underlying connections (replication handover).
    pub(crate) fn reopen(&mut self, factory: &dyn BackendFactory) -> Result<()> {
        let writable = self.flags.contains(OpenFlags::WRITABLE);
        let mut backends = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            backends.push(factory.open(endpoint, writable, true)?);
        }
        self.backends = backends;
        Ok(())
    }

    /// Commit every backend this handle touched.
    pub fn commit(&mut self) -> Result<()> {
        for backend in &self.backends {
            backend.commit()?;
        }
        self.modified = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::{Endpoint, MemoryBackendFactory};

    #[test]
    fn test_open_requires_spawn_for_new() {
        let factory = MemoryBackendFactory::new();
        let eps = Endpoints::single(Endpoint::new("idx"));
        assert!(Shard::open(&factory, &eps, OpenFlags::empty()).is_err());
        assert!(Shard::open(&factory, &eps, OpenFlags::SPAWN).is_ok());
        // Now it exists; read-only open works
        assert!(Shard::open(&factory, &eps, OpenFlags::empty()).is_ok());
    }

    #[test]
    fn test_term_routing_is_stable() {
        let factory = MemoryBackendFactory::new();
        let eps = Endpoints::shards(&Endpoint::new("idx"), 3);
        let shard = Shard::open(&factory, &eps, OpenFlags::SPAWN).unwrap();
        let a = shard.shard_for_term(b"Qdoc-1");
        assert_eq!(a, shard.shard_for_term(b"Qdoc-1"));
        assert!(a < 3);
    }
}
