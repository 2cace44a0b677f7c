//! Boolean query tree handed to the Index Backend.

use std::fmt;

/// A query over index terms.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Query {
    /// Matches nothing
    #[default]
    Empty,
    /// A single term with a within-query frequency
    Term { term: Vec<u8>, wqf: u32 },
    /// All sub-queries must match
    And(Vec<Query>),
    /// Any sub-query may match
    Or(Vec<Query>),
}

impl Query {
    /// A term query with wqf 1
    pub fn term(term: impl Into<Vec<u8>>) -> Self {
        Query::Term {
            term: term.into(),
            wqf: 1,
        }
    }

    /// A term query with an explicit wqf
    pub fn term_wqf(term: impl Into<Vec<u8>>, wqf: u32) -> Self {
        Query::Term {
            term: term.into(),
            wqf,
        }
    }

    /// Whether this query matches nothing
    pub fn is_empty(&self) -> bool {
        matches!(self, Query::Empty)
    }

    /// Conjunction, flattening and dropping empties.
    pub fn and(queries: impl IntoIterator<Item = Query>) -> Self {
        let mut parts = Vec::new();
        for q in queries {
            match q {
                Query::Empty => {}
                Query::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Query::Empty,
            1 => parts.pop().unwrap(),
            _ => Query::And(parts),
        }
    }

    /// Disjunction, flattening and dropping empties.
    pub fn or(queries: impl IntoIterator<Item = Query>) -> Self {
        let mut parts = Vec::new();
        for q in queries {
            match q {
                Query::Empty => {}
                Query::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Query::Empty,
            1 => parts.pop().unwrap(),
            _ => Query::Or(parts),
        }
    }

    /// Number of term leaves.
    pub fn term_count(&self) -> usize {
        match self {
            Query::Empty => 0,
            Query::Term { .. } => 1,
            Query::And(qs) | Query::Or(qs) => qs.iter().map(Query::term_count).sum(),
        }
    }

    /// Largest number of terms ORed together at any single node.
    pub fn max_or_width(&self) -> usize {
        match self {
            Query::Empty | Query::Term { .. } => 0,
            Query::And(qs) => qs.iter().map(Query::max_or_width).max().unwrap_or(0),
            Query::Or(qs) => {
                let here = qs.len();
                qs.iter()
                    .map(Query::max_or_width)
                    .max()
                    .unwrap_or(0)
                    .max(here)
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Empty => write!(f, "(empty)"),
            Query::Term { term, wqf } => {
                write!(f, "{}", String::from_utf8_lossy(term))?;
                if *wqf != 1 {
                    write!(f, "#{}", wqf)?;
                }
                Ok(())
            }
            Query::And(qs) => {
                write!(f, "(AND")?;
                for q in qs {
                    write!(f, " {}", q)?;
                }
                write!(f, ")")
            }
            Query::Or(qs) => {
                write!(f, "(OR")?;
                for q in qs {
                    write!(f, " {}", q)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattening() {
        let q = Query::or([
            Query::term(b"a".to_vec()),
            Query::Empty,
            Query::or([Query::term(b"b".to_vec()), Query::term(b"c".to_vec())]),
        ]);
        assert_eq!(q.term_count(), 3);
        assert_eq!(q.max_or_width(), 3);
    }

    #[test]
    fn test_single_collapses() {
        let q = Query::and([Query::Empty, Query::term(b"a".to_vec())]);
        assert!(matches!(q, Query::Term { .. }));
    }

    #[test]
    fn test_all_empty() {
        assert!(Query::or([Query::Empty, Query::Empty]).is_empty());
    }
}
