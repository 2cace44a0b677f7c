//! The Index Backend seam.
//!
//! The underlying full-text engine (document storage, postings, value
//! slots, match sets) is an external collaborator reached through the
//! [`Backend`] trait. [`MemoryBackend`] is the in-process
//! implementation used by tests and the default server storage.

use crate::document::Document;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::query::Query;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A search result.
#[derive(Clone, Debug, PartialEq)]
pub struct Hit {
    /// Backend-assigned document id
    pub docid: u64,
    /// Stored data blob
    pub data: String,
    /// Match weight
    pub weight: f64,
}

/// One shard of an index: the contract the schema engine and the pool
/// program against.
pub trait Backend: Send + Sync {
    /// Number of documents in this shard
    fn doccount(&self) -> Result<u64>;

    /// Add a new document, returning its backend id
    fn add_document(&self, doc: Document) -> Result<u64>;

    /// Replace the document carrying `term` (or add if absent)
    fn replace_document(&self, term: &[u8], doc: Document) -> Result<u64>;

    /// Delete the document carrying `term`; returns whether one existed
    fn delete_document(&self, term: &[u8]) -> Result<bool>;

    /// Fetch the document carrying `term`
    fn get_document(&self, term: &[u8]) -> Result<Document>;

    /// Read a metadata entry
    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a metadata entry
    fn set_metadata(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Flush pending changes
    fn commit(&self) -> Result<()>;

    /// Evaluate a boolean query, best matches first
    fn search(&self, query: &Query, limit: usize) -> Result<Vec<Hit>>;
}

/// Opens backend connections for endpoints; the pool owns one factory.
pub trait BackendFactory: Send + Sync {
    /// Open (or create, when `create` is set) the shard at `endpoint`.
    fn open(&self, endpoint: &Endpoint, writable: bool, create: bool) -> Result<Arc<dyn Backend>>;
}

#[derive(Default)]
struct MemoryInner {
    next_docid: u64,
    docs: BTreeMap<u64, Document>,
    postings: FxHashMap<Vec<u8>, FxHashSet<u64>>,
    metadata: FxHashMap<String, Vec<u8>>,
}

impl MemoryInner {
    fn insert(&mut self, doc: Document) -> u64 {
        self.next_docid += 1;
        let docid = self.next_docid;
        for (term, _) in doc.terms() {
            self.postings.entry(term.to_vec()).or_default().insert(docid);
        }
        self.docs.insert(docid, doc);
        docid
    }

    fn remove(&mut self, docid: u64) -> Option<Document> {
        let doc = self.docs.remove(&docid)?;
        for (term, _) in doc.terms() {
            if let Some(set) = self.postings.get_mut(term) {
                set.remove(&docid);
                if set.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        Some(doc)
    }

    fn eval(&self, query: &Query) -> FxHashSet<u64> {
        match query {
            Query::Empty => FxHashSet::default(),
            Query::Term { term, .. } => self.postings.get(term).cloned().unwrap_or_default(),
            Query::Or(qs) => {
                let mut out = FxHashSet::default();
                for q in qs {
                    out.extend(self.eval(q));
                }
                out
            }
            Query::And(qs) => {
                let mut iter = qs.iter();
                let mut out = match iter.next() {
                    Some(q) => self.eval(q),
                    None => return FxHashSet::default(),
                };
                for q in iter {
                    let next = self.eval(q);
                    out.retain(|d| next.contains(d));
                    if out.is_empty() {
                        break;
                    }
                }
                out
            }
        }
    }
}

/// In-process index shard.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryInner>,
}

impl MemoryBackend {
    /// Create an empty shard
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn doccount(&self) -> Result<u64> {
        Ok(self.inner.read().docs.len() as u64)
    }

    fn add_document(&self, doc: Document) -> Result<u64> {
        Ok(self.inner.write().insert(doc))
    }

    fn replace_document(&self, term: &[u8], doc: Document) -> Result<u64> {
        let mut inner = self.inner.write();
        let existing: Vec<u64> = inner
            .postings
            .get(term)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for docid in existing {
            inner.remove(docid);
        }
        Ok(inner.insert(doc))
    }

    fn delete_document(&self, term: &[u8]) -> Result<bool> {
        let mut inner = self.inner.write();
        let existing: Vec<u64> = inner
            .postings
            .get(term)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let found = !existing.is_empty();
        for docid in existing {
            inner.remove(docid);
        }
        Ok(found)
    }

    fn get_document(&self, term: &[u8]) -> Result<Document> {
        let inner = self.inner.read();
        let docid = inner
            .postings
            .get(term)
            .and_then(|s| s.iter().min().copied())
            .ok_or_else(|| Error::not_found("document"))?;
        Ok(inner.docs[&docid].clone())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().metadata.get(key).cloned())
    }

    fn set_metadata(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner
            .write()
            .metadata
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn search(&self, query: &Query, limit: usize) -> Result<Vec<Hit>> {
        let inner = self.inner.read();
        let mut docids: Vec<u64> = inner.eval(query).into_iter().collect();
        docids.sort_unstable();
        docids.truncate(limit);
        Ok(docids
            .into_iter()
            .map(|docid| Hit {
                docid,
                data: inner.docs[&docid].data().to_string(),
                weight: 1.0,
            })
            .collect())
    }
}

/// Factory handing out one shared [`MemoryBackend`] per endpoint path,
/// so writable and readable views of the same shard see the same data.
#[derive(Default)]
pub struct MemoryBackendFactory {
    shards: RwLock<FxHashMap<String, Arc<MemoryBackend>>>,
}

impl MemoryBackendFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a shard exists for this endpoint
    pub fn exists(&self, endpoint: &Endpoint) -> bool {
        self.shards.read().contains_key(endpoint.path())
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn open(&self, endpoint: &Endpoint, _writable: bool, create: bool) -> Result<Arc<dyn Backend>> {
        {
            let shards = self.shards.read();
            if let Some(shard) = shards.get(endpoint.path()) {
                return Ok(shard.clone() as Arc<dyn Backend>);
            }
        }
        if !create {
            return Err(Error::not_found(format!("index {}", endpoint)));
        }
        let mut shards = self.shards.write();
        let shard = shards
            .entry(endpoint.path().to_string())
            .or_insert_with(|| Arc::new(MemoryBackend::new()));
        Ok(shard.clone() as Arc<dyn Backend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_term(term: &[u8], data: &str) -> Document {
        let mut doc = Document::new();
        doc.add_boolean_term(term.to_vec());
        doc.set_data(data);
        doc
    }

    #[test]
    fn test_add_and_get() {
        let be = MemoryBackend::new();
        be.add_document(doc_with_term(b"Qid1", "{\"a\":1}")).unwrap();
        assert_eq!(be.doccount().unwrap(), 1);
        let doc = be.get_document(b"Qid1").unwrap();
        assert_eq!(doc.data(), "{\"a\":1}");
        assert!(be.get_document(b"Qmissing").is_err());
    }

    #[test]
    fn test_replace_is_idempotent_on_count() {
        let be = MemoryBackend::new();
        be.replace_document(b"Qid1", doc_with_term(b"Qid1", "v1"))
            .unwrap();
        be.replace_document(b"Qid1", doc_with_term(b"Qid1", "v2"))
            .unwrap();
        assert_eq!(be.doccount().unwrap(), 1);
        assert_eq!(be.get_document(b"Qid1").unwrap().data(), "v2");
    }

    #[test]
    fn test_delete() {
        let be = MemoryBackend::new();
        be.add_document(doc_with_term(b"Qid1", "x")).unwrap();
        assert!(be.delete_document(b"Qid1").unwrap());
        assert!(!be.delete_document(b"Qid1").unwrap());
        assert_eq!(be.doccount().unwrap(), 0);
    }

    #[test]
    fn test_search_and_or() {
        let be = MemoryBackend::new();
        let mut d1 = doc_with_term(b"Qid1", "d1");
        d1.add_term(b"Ka".to_vec(), 1);
        let mut d2 = doc_with_term(b"Qid2", "d2");
        d2.add_term(b"Ka".to_vec(), 1);
        d2.add_term(b"Kb".to_vec(), 1);
        be.add_document(d1).unwrap();
        be.add_document(d2).unwrap();

        let both = be
            .search(&Query::term(b"Ka".to_vec()), 10)
            .unwrap();
        assert_eq!(both.len(), 2);

        let just_b = be
            .search(
                &Query::and([Query::term(b"Ka".to_vec()), Query::term(b"Kb".to_vec())]),
                10,
            )
            .unwrap();
        assert_eq!(just_b.len(), 1);
        assert_eq!(just_b[0].data, "d2");
    }

    #[test]
    fn test_factory_shares_shards() {
        let f = MemoryBackendFactory::new();
        let a = f.open(&Endpoint::new("idx"), true, true).unwrap();
        a.set_metadata("k", b"v").unwrap();
        let b = f.open(&Endpoint::new("idx"), false, false).unwrap();
        assert_eq!(b.get_metadata("k").unwrap(), Some(b"v".to_vec()));
        assert!(f.open(&Endpoint::new("other"), false, false).is_err());
    }
}
