//! The built document handed to the Index Backend.

use std::collections::BTreeMap;

/// Per-term posting information accumulated during a schema walk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TermInfo {
    /// Within-document frequency
    pub wdf: u32,
    /// Token positions (empty for plain/boolean terms)
    pub positions: Vec<u32>,
}

/// A document under construction: terms, value slots and stored data.
///
/// Terms are kept sorted by byte string; adding the same term twice
/// accumulates its wdf, mirroring the underlying index engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    terms: BTreeMap<Vec<u8>, TermInfo>,
    values: BTreeMap<u32, Vec<u8>>,
    data: String,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term with the given within-document frequency increment.
    pub fn add_term(&mut self, term: impl Into<Vec<u8>>, wdf_inc: u32) {
        let info = self.terms.entry(term.into()).or_default();
        info.wdf += wdf_inc;
    }

    /// Add a boolean term (no frequency contribution).
    pub fn add_boolean_term(&mut self, term: impl Into<Vec<u8>>) {
        self.terms.entry(term.into()).or_default();
    }

    /// Add a positional posting for a term.
    pub fn add_posting(&mut self, term: impl Into<Vec<u8>>, position: u32, wdf_inc: u32) {
        let info = self.terms.entry(term.into()).or_default();
        info.wdf += wdf_inc;
        if !info.positions.contains(&position) {
            info.positions.push(position);
            info.positions.sort_unstable();
        }
    }

    /// Set a value slot.
    pub fn add_value(&mut self, slot: u32, value: impl Into<Vec<u8>>) {
        self.values.insert(slot, value.into());
    }

    /// Read a value slot.
    pub fn value(&self, slot: u32) -> Option<&[u8]> {
        self.values.get(&slot).map(|v| v.as_slice())
    }

    /// Set the stored data blob.
    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = data.into();
    }

    /// The stored data blob.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Whether the document carries a given term.
    pub fn has_term(&self, term: &[u8]) -> bool {
        self.terms.contains_key(term)
    }

    /// Iterate terms in sorted order.
    pub fn terms(&self) -> impl Iterator<Item = (&[u8], &TermInfo)> {
        self.terms.iter().map(|(t, i)| (t.as_slice(), i))
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Iterate value slots.
    pub fn values(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.values.iter().map(|(s, v)| (*s, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wdf_accumulates() {
        let mut doc = Document::new();
        doc.add_term(b"Sword".to_vec(), 1);
        doc.add_term(b"Sword".to_vec(), 2);
        let (_, info) = doc.terms().next().unwrap();
        assert_eq!(info.wdf, 3);
        assert_eq!(doc.term_count(), 1);
    }

    #[test]
    fn test_boolean_term_keeps_zero_wdf() {
        let mut doc = Document::new();
        doc.add_boolean_term(b"Qid".to_vec());
        let (_, info) = doc.terms().next().unwrap();
        assert_eq!(info.wdf, 0);
    }

    #[test]
    fn test_positions_sorted_dedup() {
        let mut doc = Document::new();
        doc.add_posting(b"t".to_vec(), 5, 1);
        doc.add_posting(b"t".to_vec(), 2, 1);
        doc.add_posting(b"t".to_vec(), 5, 1);
        let (_, info) = doc.terms().next().unwrap();
        assert_eq!(info.positions, vec![2, 5]);
    }
}
