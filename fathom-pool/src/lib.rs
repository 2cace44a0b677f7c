//! Shard pool for the Fathom document search server.
//!
//! A [`DatabasePool`] is the process-wide registry of
//! [`ShardQueue`]s: each endpoint set gets an ordered, reusable queue
//! of open [`Shard`] handles, capped by two LRU tables (readable vs
//! writable). Writable access is gated by a three-state replication
//! machine (`Free`/`Lock`/`Switch`); persistent writable shards carry
//! a reference count in a master bookkeeping database.

pub mod lru;
pub mod pool;
pub mod shard;
pub mod shard_queue;

pub use pool::{DatabasePool, ShardHandle};
pub use shard::{OpenFlags, Shard};
pub use shard_queue::{ReplicaState, ShardQueue};
