//! Core types for the query system

use serde::{Deserialize, Serialize};

use crate::segment::{DocumentId, Posting};

/// One literal query word and the catalog ordinals it resolved to.
///
/// Several ordinals mean the word expanded (through wildcards or the fuzzy
/// skip budget) to several indexed terms; they are OR-ed together.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermMatch {
    /// Query word as matched (lowercased)
    pub term: String,
    /// Catalog line numbers, ascending
    pub ordinals: Vec<u64>,
}

impl TermMatch {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ordinals: Vec::new(),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.ordinals.is_empty()
    }
}

/// A document in which every query word occurs in order within the
/// allowed gap
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: DocumentId,
    /// One tuple per successful anchor, one posting per query word
    pub matches: Vec<Vec<Posting>>,
}

impl SearchResult {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}
