//! Logical index identifiers and their shard expansion.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Deterministic shard routing for a serialised, prefixed id term.
pub fn shard_of(term_id: &[u8], n_shards: usize) -> usize {
    if n_shards <= 1 {
        return 0;
    }
    (xxh64(term_id, 0) % n_shards as u64) as usize
}

/// A logical index identifier, normalised to a bare slash-free path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    path: String,
}

impl Endpoint {
    /// Create an endpoint from a path, trimming surrounding slashes.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: path.as_ref().trim_matches('/').to_string(),
        }
    }

    /// The normalised path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stable fingerprint of this endpoint
    pub fn hash(&self) -> u64 {
        xxh64(self.path.as_bytes(), 0)
    }

    /// The `i`-th shard of this endpoint
    pub fn shard(&self, i: usize) -> Endpoint {
        Endpoint {
            path: format!("{}/.shard-{}", self.path, i),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// An ordered, deduplicated set of endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints(Vec<Endpoint>);

impl Endpoints {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// A single endpoint
    pub fn single(endpoint: Endpoint) -> Self {
        Self(vec![endpoint])
    }

    /// All shards of a base endpoint
    pub fn shards(base: &Endpoint, n_shards: usize) -> Self {
        if n_shards <= 1 {
            return Self::single(base.clone());
        }
        Self((0..n_shards).map(|i| base.shard(i)).collect())
    }

    /// Add an endpoint, keeping order and dropping duplicates.
    pub fn add(&mut self, endpoint: Endpoint) {
        if !self.0.contains(&endpoint) {
            self.0.push(endpoint);
        }
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate endpoints in order
    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.0.iter()
    }

    /// The `i`-th endpoint
    pub fn get(&self, i: usize) -> Option<&Endpoint> {
        self.0.get(i)
    }

    /// Stable fingerprint of the whole set.
    pub fn hash(&self) -> u64 {
        let mut joined = Vec::new();
        for e in &self.0 {
            joined.extend_from_slice(e.path().as_bytes());
            joined.push(b';');
        }
        xxh64(&joined, 0)
    }
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl From<Endpoint> for Endpoints {
    fn from(e: Endpoint) -> Self {
        Endpoints::single(e)
    }
}

impl FromIterator<Endpoint> for Endpoints {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        let mut out = Endpoints::new();
        for e in iter {
            out.add(e);
        }
        out
    }
}

impl<'a> IntoIterator for &'a Endpoints {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalisation() {
        assert_eq!(Endpoint::new("/idx/").path(), "idx");
        assert_eq!(Endpoint::new("idx"), Endpoint::new("/idx"));
    }

    #[test]
    fn test_hash_stable_and_order_sensitive() {
        let a = Endpoints::from_iter([Endpoint::new("a"), Endpoint::new("b")]);
        let b = Endpoints::from_iter([Endpoint::new("b"), Endpoint::new("a")]);
        assert_eq!(a.hash(), a.clone().hash());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_shard_expansion() {
        let eps = Endpoints::shards(&Endpoint::new("idx"), 3);
        assert_eq!(eps.len(), 3);
        assert_eq!(eps.get(1).unwrap().path(), "idx/.shard-1");
        let single = Endpoints::shards(&Endpoint::new("idx"), 1);
        assert_eq!(single.get(0).unwrap().path(), "idx");
    }

    #[test]
    fn test_dedup() {
        let mut eps = Endpoints::new();
        eps.add(Endpoint::new("x"));
        eps.add(Endpoint::new("/x/"));
        assert_eq!(eps.len(), 1);
    }
}
