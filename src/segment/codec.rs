//! Token codec
//!
//! A serialized token is:
//! - doc id (7-bit varint)
//! - posting count (7-bit varint)
//! - per posting: position delta, char index delta, length (7-bit varints)
//!
//! Deltas are taken against the previous posting of the same token and start
//! from zero. A term block is the plain concatenation of its tokens.

use std::collections::BTreeMap;

use super::types::{DocumentId, Posting, Token};

/// Smallest possible serialized posting (three one-byte varints)
const MIN_POSTING_BYTES: usize = 3;

/// 7-bit varint: low groups first, high bit set on every byte but the last
pub fn encode_vbyte(value: u32, output: &mut Vec<u8>) {
    let mut v = value;
    while v >= 0x80 {
        output.push((v as u8) | 0x80);
        v >>= 7;
    }
    output.push(v as u8);
}

/// Decode a 7-bit varint. `None` on end of input or an over-long encoding.
pub fn decode_vbyte(input: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0u32;

    loop {
        let byte = *input.get(*pos)?;
        *pos += 1;

        if shift == 28 && byte > 0x0F {
            return None;
        }
        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
    }
}

/// Append one serialized token to `output`
pub fn encode_token(token: &Token, output: &mut Vec<u8>) {
    encode_vbyte(token.doc_id, output);
    encode_vbyte(token.postings.len() as u32, output);

    let mut prev_pos = 0u32;
    let mut prev_index = 0u32;
    for p in &token.postings {
        encode_vbyte(p.position.wrapping_sub(prev_pos), output);
        encode_vbyte(p.char_index.wrapping_sub(prev_index), output);
        encode_vbyte(p.length, output);
        prev_pos = p.position;
        prev_index = p.char_index;
    }
}

/// Serialize a single token
pub fn encode_token_to_vec(token: &Token) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + token.postings.len() * MIN_POSTING_BYTES);
    encode_token(token, &mut out);
    out
}

/// Serialize tokens back to back as one block
pub fn encode_token_group(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    for token in tokens {
        encode_token(token, &mut out);
    }
    out
}

/// Decode the token starting at `*pos`.
///
/// Truncated or malformed input yields `None` and leaves `*pos` untouched;
/// callers treat that as the end of the block.
pub fn decode_token(input: &[u8], pos: &mut usize) -> Option<Token> {
    let mut cursor = *pos;
    let doc_id = decode_vbyte(input, &mut cursor)?;
    let count = decode_vbyte(input, &mut cursor)? as usize;

    let remaining = input.len().saturating_sub(cursor);
    if count > remaining / MIN_POSTING_BYTES {
        return None;
    }

    let mut postings = Vec::with_capacity(count);
    let mut position = 0u32;
    let mut char_index = 0u32;
    for _ in 0..count {
        position = position.wrapping_add(decode_vbyte(input, &mut cursor)?);
        char_index = char_index.wrapping_add(decode_vbyte(input, &mut cursor)?);
        let length = decode_vbyte(input, &mut cursor)?;
        postings.push(Posting::new(position, char_index, length));
    }

    *pos = cursor;
    Some(Token::new(doc_id, postings))
}

/// Walk one token without materializing postings; returns its doc id.
fn skip_token(input: &[u8], pos: &mut usize) -> Option<DocumentId> {
    let mut cursor = *pos;
    let doc_id = decode_vbyte(input, &mut cursor)?;
    let count = decode_vbyte(input, &mut cursor)?;
    for _ in 0..count as u64 * 3 {
        decode_vbyte(input, &mut cursor)?;
    }
    *pos = cursor;
    Some(doc_id)
}

/// Lazily decode every token of a block
pub fn decode_group(data: &[u8]) -> TokenGroup<'_> {
    TokenGroup { data, pos: 0 }
}

/// Iterator over the tokens of one block; stops at the first undecodable token
#[derive(Clone, Debug)]
pub struct TokenGroup<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for TokenGroup<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.pos >= self.data.len() {
            return None;
        }
        match decode_token(self.data, &mut self.pos) {
            Some(token) => Some(token),
            None => {
                self.pos = self.data.len();
                None
            }
        }
    }
}

/// Iterator over `(doc_id, raw token bytes)` of one block
#[derive(Clone, Debug)]
pub struct TokenSlices<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TokenSlices<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for TokenSlices<'a> {
    type Item = (DocumentId, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        match skip_token(self.data, &mut self.pos) {
            Some(doc_id) => Some((doc_id, &self.data[start..self.pos])),
            None => {
                self.pos = self.data.len();
                None
            }
        }
    }
}

/// Overlay blocks in order and re-emit them sorted by doc id.
///
/// A token from a later block (or later in the same block) fully replaces an
/// earlier token with the same doc id. Raw token bytes are copied unchanged.
pub fn overlay_token_groups<'a, I>(blocks: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut merged: BTreeMap<DocumentId, &'a [u8]> = BTreeMap::new();
    for block in blocks {
        for (doc_id, raw) in TokenSlices::new(block) {
            merged.insert(doc_id, raw);
        }
    }

    let total: usize = merged.values().map(|raw| raw.len()).sum();
    let mut out = Vec::with_capacity(total);
    for raw in merged.values() {
        out.extend_from_slice(raw);
    }
    out
}

/// True when the block's doc ids are strictly ascending
pub fn is_sorted_by_doc_id(data: &[u8]) -> bool {
    let mut prev: Option<DocumentId> = None;
    for (doc_id, _) in TokenSlices::new(data) {
        if prev.map_or(false, |p| p >= doc_id) {
            return false;
        }
        prev = Some(doc_id);
    }
    true
}
