//! Core types for the segment file format

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Footer marker in the high 16 bits of the last 8 bytes of a segment
pub const MAGIC_MARKER: u16 = 0xCAFE;

/// Length of a term digest (SHA-256)
pub const HASH_LEN: usize = 32;

/// One index table record: 32-byte hash + i64 offset + i32 length
pub const RECORD_SIZE: usize = HASH_LEN + 8 + 4;

/// Footer size in bytes
pub const FOOTER_SIZE: u64 = 8;

/// The low 48 bits of the footer carry the index table length
pub const TABLE_LENGTH_MASK: u64 = (1 << 48) - 1;

/// Extension of finalized segment files
pub const SEGMENT_EXTENSION: &str = "tks";

/// External document ID, assigned by the document id store
pub type DocumentId = u32;

/// One occurrence of a term in a document
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Posting {
    /// Rank of the word among all kept words of the document (0-based)
    pub position: u32,
    /// Offset of the first character in the original text
    pub char_index: u32,
    /// Character span, including skipped diacritics and quotes
    pub length: u32,
}

impl Posting {
    pub fn new(position: u32, char_index: u32, length: u32) -> Self {
        Self {
            position,
            char_index,
            length,
        }
    }
}

/// All occurrences of one term within one document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub doc_id: DocumentId,
    /// Ordered by ascending position
    pub postings: Vec<Posting>,
}

impl Token {
    pub fn new(doc_id: DocumentId, postings: Vec<Posting>) -> Self {
        Self { doc_id, postings }
    }
}

/// SHA-256 digest of the NFC-normalized term; the term's identity on disk.
///
/// Ordering is byte-lexicographic, which is the index table sort order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermHash(pub [u8; HASH_LEN]);

impl TermHash {
    pub fn of(term: &str) -> Self {
        let normalized: String = term.nfc().collect();
        let digest = Sha256::digest(normalized.as_bytes());
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for TermHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermHash(")?;
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// Index table entry locating one term block in the data region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentRecord {
    pub hash: TermHash,
    pub offset: u64,
    pub length: u32,
}

impl SegmentRecord {
    pub fn new(hash: TermHash, offset: u64, length: u32) -> Self {
        Self {
            hash,
            offset,
            length,
        }
    }

    /// Byte offset one past the end of the block
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    /// Little-endian on-disk layout
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..HASH_LEN].copy_from_slice(&self.hash.0);
        out[HASH_LEN..HASH_LEN + 8].copy_from_slice(&(self.offset as i64).to_le_bytes());
        out[HASH_LEN + 8..].copy_from_slice(&(self.length as i32).to_le_bytes());
        out
    }

    /// Decode one record; `None` when offset or length is negative
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_SIZE {
            return None;
        }
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&bytes[..HASH_LEN]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[HASH_LEN..HASH_LEN + 8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[HASH_LEN + 8..RECORD_SIZE]);

        let offset = i64::from_le_bytes(offset);
        let length = i32::from_le_bytes(length);
        if offset < 0 || length < 0 {
            return None;
        }
        Some(Self::new(TermHash(hash), offset as u64, length as u32))
    }
}

/// Pack the footer word: marker in the high 16 bits, table length below
pub fn encode_footer(table_length: u64) -> u64 {
    ((MAGIC_MARKER as u64) << 48) | (table_length & TABLE_LENGTH_MASK)
}

/// Split a footer word into `(marker, table_length)`
pub fn decode_footer(footer: u64) -> (u16, u64) {
    ((footer >> 48) as u16, footer & TABLE_LENGTH_MASK)
}
