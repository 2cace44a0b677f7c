//! Shared application state.

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use fathom_core::{
    BackendFactory, Endpoint, Endpoints, MemoryBackendFactory, Value, DB_META_SCHEMA,
};
use fathom_pool::{DatabasePool, Shard, ShardHandle};
use fathom_schema::{Schema, ShardStats};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Application state shared across handlers.
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// The shard pool
    pub pool: Arc<DatabasePool>,
    /// Published schema snapshots per endpoint-set fingerprint.
    ///
    /// Readers see the pre-update or post-update snapshot, never a
    /// partial merge; writers swap the Arc on successful commit.
    schemas: RwLock<FxHashMap<u64, Arc<Value>>>,
    /// Per-endpoint write serialisation for schema updates
    write_locks: Mutex<FxHashMap<u64, Arc<Mutex<()>>>>,
}

impl AppState {
    /// Create state over the in-process backend.
    pub fn new(config: ServerConfig) -> Self {
        let factory: Arc<dyn BackendFactory> = Arc::new(MemoryBackendFactory::new());
        Self::with_factory(config, factory)
    }

    /// Create state over an arbitrary backend factory.
    pub fn with_factory(config: ServerConfig, factory: Arc<dyn BackendFactory>) -> Self {
        let pool = Arc::new(DatabasePool::new(
            factory,
            config.pool_queues,
            config.pool_handles,
        ));
        AppState {
            config,
            pool,
            schemas: RwLock::new(FxHashMap::default()),
            write_locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// The endpoint set an index name expands to.
    pub fn endpoints(&self, index: &str) -> Result<Endpoints> {
        if index.is_empty() || index.starts_with('_') || index.starts_with('.') {
            return Err(ServerError::bad_request(format!(
                "invalid index name {:?}",
                index
            )));
        }
        Ok(Endpoints::shards(&Endpoint::new(index), self.config.n_shards))
    }

    /// The per-endpoint write lock serialising schema updates.
    pub fn write_lock(&self, hash: u64) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .entry(hash)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the published schema for an endpoint set, falling back to
    /// the copy persisted in the backend's metadata, then to empty.
    pub fn load_schema(&self, hash: u64, shard: &Shard) -> Result<Schema> {
        if let Some(shared) = self.schemas.read().get(&hash) {
            return Ok(Schema::new(shared.clone())?);
        }
        let shared = match shard
            .backend(0)
            .and_then(|b| b.get_metadata(DB_META_SCHEMA).ok().flatten())
        {
            Some(raw) => {
                let text = String::from_utf8(raw).map_err(|_| {
                    ServerError::Core(fathom_core::Error::corruption(
                        "stored schema is not UTF-8",
                    ))
                })?;
                Arc::new(Value::from_json(&text)?)
            }
            None => Arc::new(Schema::empty_root()),
        };
        let schema = Schema::new(shared.clone())?;
        self.schemas.write().insert(hash, shared);
        Ok(schema)
    }

    /// Persist and publish a modified schema snapshot.
    pub fn publish_schema(&self, hash: u64, shard: &Shard, shared: Arc<Value>) -> Result<()> {
        if let Some(backend) = shard.backend(0) {
            backend.set_metadata(DB_META_SCHEMA, shared.to_json().as_bytes())?;
        }
        self.schemas.write().insert(hash, shared);
        Ok(())
    }

    /// Drop the published snapshot (after index deletion).
    pub fn forget_schema(&self, hash: u64) {
        self.schemas.write().remove(&hash);
    }
}

/// Best-effort shard statistics over a checked-out handle.
pub struct HandleStats<'a>(pub &'a ShardHandle);

impl ShardStats for HandleStats<'_> {
    fn shard_count(&self) -> usize {
        self.0.shard_count()
    }

    fn doccount(&self, shard: usize) -> Option<u64> {
        self.0.doccount(shard)
    }
}
