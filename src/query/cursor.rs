//! Forward-only token cursors over segment blocks
//!
//! A cursor's position is its own absolute byte offset. Every activation
//! reads from that offset through the reader, so many cursors can share one
//! `SegmentReader` without relying on a shared file position.

use crate::error::Result;
use crate::segment::codec::decode_token;
use crate::segment::{DocumentId, Posting, SegmentReader, SegmentRecord, Token};

/// Bytes read per activation before growing for a larger token
const READ_WINDOW: u64 = 4096;

/// Cursor over the tokens of one term block
#[derive(Debug)]
pub struct TokenCursor {
    offset: u64,
    end: u64,
    current: Token,
}

impl TokenCursor {
    /// Open a cursor on `record` and read its first token.
    ///
    /// `None` when the block holds no decodable token.
    pub fn open(reader: &SegmentReader, record: &SegmentRecord) -> Result<Option<Self>> {
        let mut offset = record.offset;
        let end = record.end();
        Ok(read_next(reader, &mut offset, end)?.map(|current| Self {
            offset,
            end,
            current,
        }))
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    pub fn doc_id(&self) -> DocumentId {
        self.current.doc_id
    }

    /// Move to the next token; `false` once the block is exhausted
    pub fn advance(&mut self, reader: &SegmentReader) -> Result<bool> {
        match read_next(reader, &mut self.offset, self.end)? {
            Some(token) => {
                self.current = token;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Decode the token at `*offset`, growing the read window when a token
/// does not fit. A token cut short by the block end ends the block.
fn read_next(reader: &SegmentReader, offset: &mut u64, end: u64) -> Result<Option<Token>> {
    let mut window = READ_WINDOW;
    loop {
        let remaining = end.saturating_sub(*offset);
        if remaining == 0 {
            return Ok(None);
        }
        let len = window.min(remaining);
        let bytes = reader.read_block(*offset, len as u32)?;

        let mut pos = 0;
        if let Some(token) = decode_token(&bytes, &mut pos) {
            *offset += pos as u64;
            return Ok(Some(token));
        }
        if len == remaining {
            *offset = end;
            return Ok(None);
        }
        window = window.saturating_mul(2);
    }
}

/// The cursors of every term one query word resolved to.
///
/// Tracks the smallest current doc id and exposes the postings of all
/// cursors sitting on it, which ORs the resolved terms together.
#[derive(Debug, Default)]
pub struct CursorGroup {
    cursors: Vec<TokenCursor>,
    min_doc_id: Option<DocumentId>,
}

impl CursorGroup {
    pub fn new(cursors: Vec<TokenCursor>) -> Self {
        let mut group = Self {
            cursors,
            min_doc_id: None,
        };
        group.refresh_min();
        group
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Smallest doc id among live cursors
    pub fn min_doc_id(&self) -> Option<DocumentId> {
        self.min_doc_id
    }

    /// Postings of every cursor at the minimum doc id, by ascending position
    pub fn current_postings(&self) -> Vec<Posting> {
        let Some(min) = self.min_doc_id else {
            return Vec::new();
        };
        let mut postings: Vec<Posting> = self
            .cursors
            .iter()
            .filter(|c| c.doc_id() == min)
            .flat_map(|c| c.current().postings.iter().copied())
            .collect();
        postings.sort_by_key(|p| p.position);
        postings
    }

    /// Advance every cursor at or below the minimum, dropping exhausted ones.
    ///
    /// Returns `true` when the group moved: a cursor advanced or was dropped.
    pub fn advance(&mut self, reader: &SegmentReader) -> Result<bool> {
        let Some(min) = self.min_doc_id else {
            return Ok(false);
        };

        let mut progressed = false;
        let mut index = 0;
        while index < self.cursors.len() {
            if self.cursors[index].doc_id() <= min {
                progressed = true;
                if !self.cursors[index].advance(reader)? {
                    self.cursors.swap_remove(index);
                    continue;
                }
            }
            index += 1;
        }

        self.refresh_min();
        Ok(progressed)
    }

    fn refresh_min(&mut self) {
        self.min_doc_id = self.cursors.iter().map(|c| c.doc_id()).min();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::codec::encode_token_group;
    use crate::segment::{SegmentWriter, TermHash};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn token(doc_id: u32, positions: &[u32]) -> Token {
        Token::new(
            doc_id,
            positions.iter().map(|&p| Posting::new(p, p * 4, 3)).collect(),
        )
    }

    fn segment(dir: &TempDir, terms: &[(&str, Vec<Token>)]) -> PathBuf {
        let path = dir.path().join("seg.tks");
        let mut writer = SegmentWriter::create(&path).unwrap();
        for (term, tokens) in terms {
            writer.put_hash(TermHash::of(term), &encode_token_group(tokens)).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn record(reader: &SegmentReader, term: &str) -> SegmentRecord {
        let hash = TermHash::of(term);
        reader.records().map(|r| r.unwrap()).find(|r| r.hash == hash).unwrap()
    }

    #[test]
    fn test_cursor_walks_block() {
        let tmp = TempDir::new().unwrap();
        let tokens = vec![token(1, &[0]), token(4, &[2, 9]), token(7, &[1])];
        let path = segment(&tmp, &[("alpha", tokens.clone())]);
        let reader = SegmentReader::open(&path).unwrap();

        let mut cursor = TokenCursor::open(&reader, &record(&reader, "alpha")).unwrap().unwrap();
        assert_eq!(cursor.current(), &tokens[0]);
        assert!(cursor.advance(&reader).unwrap());
        assert_eq!(cursor.current(), &tokens[1]);
        assert!(cursor.advance(&reader).unwrap());
        assert_eq!(cursor.doc_id(), 7);
        assert!(!cursor.advance(&reader).unwrap());
    }

    #[test]
    fn test_interleaved_cursors_share_reader() {
        let tmp = TempDir::new().unwrap();
        let a = vec![token(1, &[0]), token(2, &[0]), token(3, &[0])];
        let b = vec![token(10, &[5]), token(20, &[5])];
        let path = segment(&tmp, &[("alpha", a), ("beta", b)]);
        let reader = SegmentReader::open(&path).unwrap();

        let mut ca = TokenCursor::open(&reader, &record(&reader, "alpha")).unwrap().unwrap();
        let mut cb = TokenCursor::open(&reader, &record(&reader, "beta")).unwrap().unwrap();
        assert!(ca.advance(&reader).unwrap());
        assert!(cb.advance(&reader).unwrap());
        assert!(ca.advance(&reader).unwrap());
        assert_eq!(ca.doc_id(), 3);
        assert_eq!(cb.doc_id(), 20);
    }

    #[test]
    fn test_token_larger_than_window() {
        let tmp = TempDir::new().unwrap();
        let positions: Vec<u32> = (0..3000).map(|i| i * 200).collect();
        let big = token(3, &positions);
        let path = segment(&tmp, &[("alpha", vec![big.clone(), token(9, &[1])])]);
        let reader = SegmentReader::open(&path).unwrap();

        let mut cursor = TokenCursor::open(&reader, &record(&reader, "alpha")).unwrap().unwrap();
        assert_eq!(cursor.current(), &big);
        assert!(cursor.advance(&reader).unwrap());
        assert_eq!(cursor.doc_id(), 9);
    }

    #[test]
    fn test_empty_block_has_no_cursor() {
        let tmp = TempDir::new().unwrap();
        let path = segment(&tmp, &[("gone", vec![])]);
        let reader = SegmentReader::open(&path).unwrap();
        assert!(TokenCursor::open(&reader, &record(&reader, "gone")).unwrap().is_none());
    }

    #[test]
    fn test_group_unions_cursors_at_min() {
        let tmp = TempDir::new().unwrap();
        let path = segment(
            &tmp,
            &[
                ("alpha", vec![token(1, &[4]), token(5, &[0])]),
                ("alfalfa", vec![token(1, &[1, 8]), token(2, &[3])]),
            ],
        );
        let reader = SegmentReader::open(&path).unwrap();
        let cursors = ["alpha", "alfalfa"]
            .iter()
            .map(|t| TokenCursor::open(&reader, &record(&reader, t)).unwrap().unwrap())
            .collect();
        let mut group = CursorGroup::new(cursors);

        assert_eq!(group.min_doc_id(), Some(1));
        let positions: Vec<u32> = group.current_postings().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![1, 4, 8]);

        assert!(group.advance(&reader).unwrap());
        assert_eq!(group.min_doc_id(), Some(2));
        assert_eq!(group.current_postings().len(), 1);

        // alfalfa exhausts and is dropped; alpha stays at doc 5
        assert!(group.advance(&reader).unwrap());
        assert_eq!(group.len(), 1);
        assert_eq!(group.min_doc_id(), Some(5));

        assert!(group.advance(&reader).unwrap());
        assert!(group.is_empty());
        assert_eq!(group.min_doc_id(), None);
        assert!(!group.advance(&reader).unwrap());
    }
}
