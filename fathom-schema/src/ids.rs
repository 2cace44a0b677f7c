//! Document id generation and shard placement.
//!
//! New auto-generated ids are steered towards the least-loaded active
//! shard: candidates are generated until one hashes onto it, keeping
//! the last candidate that landed on any active shard as a fallback.

pub use fathom_core::endpoint::shard_of;
use fathom_core::{Error, Result, Value};
use uuid::Uuid;

/// Attempts made to place a generated id on the least-loaded shard.
const ID_PLACEMENT_ATTEMPTS: usize = 10;

/// Best-effort shard statistics used for id placement.
///
/// `doccount` returns `None` for shards whose node is not active;
/// those never receive generated ids.
pub trait ShardStats {
    /// Number of shards behind the endpoint
    fn shard_count(&self) -> usize;

    /// Document count of shard `i`, `None` when inactive
    fn doccount(&self, shard: usize) -> Option<u64>;
}

/// A single always-active shard (the common unsharded case, and the
/// test default).
pub struct SingleShard(pub u64);

impl ShardStats for SingleShard {
    fn shard_count(&self) -> usize {
        1
    }

    fn doccount(&self, _shard: usize) -> Option<u64> {
        Some(self.0)
    }
}

/// Seam for the embedded scripting engine: may replace the document
/// object before the walk. No engine ships with this repo.
pub trait ScriptHook {
    /// Run the configured script over `obj`; `Some` replaces it.
    fn process(&self, obj: &Value) -> Result<Option<Value>>;
}

impl<F> ScriptHook for F
where
    F: Fn(&Value) -> Result<Option<Value>>,
{
    fn process(&self, obj: &Value) -> Result<Option<Value>> {
        self(obj)
    }
}

/// The least-loaded active shard, if any is active.
pub fn min_shard(stats: &dyn ShardStats) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for i in 0..stats.shard_count() {
        if let Some(count) = stats.doccount(i) {
            match best {
                Some((_, c)) if c <= count => {}
                _ => best = Some((i, count)),
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Generate a UUID id steered towards the least-loaded active shard.
///
/// `term_of` maps a candidate id string to its prefixed term form (the
/// routing key). Returns the chosen id string.
pub fn generate_uuid_id(
    stats: &dyn ShardStats,
    term_of: impl Fn(&str) -> Result<Vec<u8>>,
) -> Result<String> {
    let n = stats.shard_count();
    let target =
        min_shard(stats).ok_or_else(|| Error::conflict("no active shard accepts writes"))?;

    let mut last_active: Option<String> = None;
    for _ in 0..ID_PLACEMENT_ATTEMPTS {
        let candidate = Uuid::new_v4().to_string();
        let term = term_of(&candidate)?;
        let shard = shard_of(&term, n);
        if stats.doccount(shard).is_some() {
            if shard == target {
                return Ok(candidate);
            }
            last_active = Some(candidate);
        }
    }
    last_active.ok_or_else(|| Error::conflict("no active shard accepts writes"))
}

/// Generate a monotonically-unique numeric id from the total document
/// count across active shards.
pub fn generate_numeric_id(stats: &dyn ShardStats) -> u64 {
    let total: u64 = (0..stats.shard_count())
        .filter_map(|i| stats.doccount(i))
        .sum();
    total + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeStats(Vec<Option<u64>>);

    impl ShardStats for FakeStats {
        fn shard_count(&self) -> usize {
            self.0.len()
        }

        fn doccount(&self, shard: usize) -> Option<u64> {
            self.0[shard]
        }
    }

    #[test]
    fn test_min_shard_prefers_smallest() {
        let stats = FakeStats(vec![Some(10), Some(3), Some(7)]);
        assert_eq!(min_shard(&stats), Some(1));
    }

    #[test]
    fn test_min_shard_skips_inactive() {
        let stats = FakeStats(vec![None, Some(9), None]);
        assert_eq!(min_shard(&stats), Some(1));
        assert_eq!(min_shard(&FakeStats(vec![None, None])), None);
    }

    #[test]
    fn test_generated_id_routes_to_active_shard() {
        let stats = FakeStats(vec![Some(100), None, Some(2)]);
        let id = generate_uuid_id(&stats, |s| Ok(format!("Q{}", s).into_bytes())).unwrap();
        let shard = shard_of(format!("Q{}", id).as_bytes(), 3);
        assert!(stats.doccount(shard).is_some(), "id landed on inactive shard");
    }

    #[test]
    fn test_generate_uuid_id_no_active() {
        let stats = FakeStats(vec![None, None]);
        assert!(generate_uuid_id(&stats, |s| Ok(s.as_bytes().to_vec())).is_err());
    }

    #[test]
    fn test_numeric_id_monotone_from_counts() {
        assert_eq!(generate_numeric_id(&FakeStats(vec![Some(4), Some(6)])), 11);
        assert_eq!(generate_numeric_id(&SingleShard(0)), 1);
    }
}
