//! Streaming search executor
//!
//! One `CursorGroup` per query word walks its blocks in doc id order. A
//! document is a candidate when every group sits on it; the candidate is
//! reported when the words occur in query order within the allowed gap.

use tracing::debug;

use super::cursor::{CursorGroup, TokenCursor};
use super::types::{SearchResult, TermMatch};
use crate::error::Result;
use crate::segment::{DocumentId, Posting, SegmentReader};

/// Thread chains of postings through `lists` in order.
///
/// `lists[0]` supplies the anchors. For every later list the next posting
/// strictly after the chain's last position is taken; the chain fails when
/// none is left or the gap exceeds `max_gap`. Per-list cursors only move
/// forward and persist across anchors of the same document.
pub fn ordered_adjacency_match(
    doc_id: DocumentId,
    lists: &[Vec<Posting>],
    max_gap: u32,
) -> Option<SearchResult> {
    let first = lists.first()?;
    let mut cursors = vec![0usize; lists.len()];
    let mut matches = Vec::new();

    'anchors: for anchor in first {
        let mut chain = Vec::with_capacity(lists.len());
        chain.push(*anchor);
        let mut prev = anchor.position;

        for (list_idx, list) in lists.iter().enumerate().skip(1) {
            let mut cursor = cursors[list_idx];
            while cursor < list.len() && list[cursor].position <= prev {
                cursor += 1;
            }
            let Some(next) = list.get(cursor) else {
                continue 'anchors;
            };
            if next.position - prev > max_gap {
                continue 'anchors;
            }
            chain.push(*next);
            prev = next.position;
            cursors[list_idx] = cursor;
        }

        matches.push(chain);
    }

    if matches.is_empty() {
        None
    } else {
        Some(SearchResult { doc_id, matches })
    }
}

/// Lazy multi-word search over one segment
pub struct SearchExecutor {
    reader: SegmentReader,
    groups: Vec<CursorGroup>,
    max_gap: u32,
    done: bool,
}

impl SearchExecutor {
    /// Open one cursor per resolved ordinal.
    ///
    /// `adjacency` is the number of words allowed between consecutive query
    /// words; adjacent words differ by one position.
    pub fn new(reader: SegmentReader, terms: &[TermMatch], adjacency: u32) -> Result<Self> {
        let mut groups = Vec::with_capacity(terms.len());
        let mut done = terms.is_empty();

        for term in terms {
            let mut cursors = Vec::with_capacity(term.ordinals.len());
            for &ordinal in &term.ordinals {
                let record = reader.record_at(ordinal)?;
                if let Some(cursor) = TokenCursor::open(&reader, &record)? {
                    cursors.push(cursor);
                }
            }
            debug!(term = %term.term, ordinals = term.ordinals.len(), cursors = cursors.len(), "opened term cursors");

            let group = CursorGroup::new(cursors);
            if group.is_empty() {
                done = true;
            }
            groups.push(group);
        }

        Ok(Self {
            reader,
            groups,
            max_gap: adjacency.saturating_add(1),
            done,
        })
    }

    /// Examine the current target document and advance past it
    fn step(&mut self) -> Result<Option<SearchResult>> {
        if self.groups.iter().any(|g| g.is_empty()) {
            self.done = true;
            return Ok(None);
        }
        let Some(target) = self.groups.iter().filter_map(|g| g.min_doc_id()).min() else {
            self.done = true;
            return Ok(None);
        };

        let result = if self.groups.iter().all(|g| g.min_doc_id() == Some(target)) {
            let lists: Vec<Vec<Posting>> = self.groups.iter().map(|g| g.current_postings()).collect();
            ordered_adjacency_match(target, &lists, self.max_gap)
        } else {
            None
        };

        let mut progressed = false;
        for group in self.groups.iter_mut() {
            if group.min_doc_id() == Some(target) {
                progressed |= group.advance(&self.reader)?;
            }
        }
        if !progressed {
            self.done = true;
        }

        Ok(result)
    }
}

impl Iterator for SearchExecutor {
    type Item = Result<SearchResult>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.step() {
                Ok(Some(result)) => return Some(Ok(result)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
