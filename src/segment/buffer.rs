//! Write buffer for recent postings
//!
//! Each term accumulates the serialized tokens logged for it since the last
//! flush. Producers may log concurrently: the term map is a `DashMap` and
//! every term buffer has its own lock. When usage reaches the memory cap the
//! buffer is flushed into a new segment, and every `merge_every_flushes`
//! flushes the segments are merged.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::codec::{encode_token_to_vec, is_sorted_by_doc_id, overlay_token_groups};
use super::index::TokenIndex;
use super::types::Token;
use super::writer::SegmentSummary;
use crate::error::Result;

const MB: usize = 1024 * 1024;

/// Smallest cap the scaling rule may produce, in MB
const MIN_MEMORY_CAP_MB: usize = 5;

/// Scale a requested cap (MB) to the bytes the buffer may hold.
///
/// The request is limited to 60% of available memory, then divided by 15
/// with a 5 MB floor.
pub fn compute_memory_cap(requested_mb: usize, available_mb: Option<f64>) -> usize {
    let available = available_mb.unwrap_or(requested_mb as f64);
    let safe = (requested_mb as f64).min(available * 0.6).max(0.0) as usize;
    MIN_MEMORY_CAP_MB.max(safe / 15) * MB
}

/// `MemAvailable` from a `/proc/meminfo` dump, in MB
pub fn parse_mem_available(meminfo: &str) -> Option<f64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kb: f64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kb / 1024.0)
    })
}

/// Available system memory in MB, when the platform reports it
pub fn available_memory_mb() -> Option<f64> {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| parse_mem_available(&text))
}

/// Statistics about the write buffer
#[derive(Clone, Debug, Default)]
pub struct BufferStats {
    pub term_count: usize,
    pub usage_bytes: usize,
    pub memory_cap_bytes: usize,
    pub flushes_since_merge: usize,
}

/// Per-term in-memory token buffers in front of the token index
pub struct WriteBuffer {
    index: Arc<TokenIndex>,
    buffers: DashMap<String, Mutex<Vec<u8>>>,
    usage: AtomicUsize,
    memory_cap: usize,
    merge_every: usize,
    flushes_since_merge: AtomicUsize,
    /// Shared by producers while appending, exclusive while flushing
    flush_gate: RwLock<()>,
    finished: AtomicBool,
}

impl WriteBuffer {
    /// Create a buffer using the index's configured cap and merge cadence
    pub fn new(index: Arc<TokenIndex>) -> Self {
        let config = index.config().buffer.clone();
        let cap = compute_memory_cap(config.memory_cap_mb, available_memory_mb());
        Self::with_cap(index, cap, config.merge_every_flushes)
    }

    /// Create a buffer with an explicit cap in bytes
    pub fn with_cap(index: Arc<TokenIndex>, memory_cap_bytes: usize, merge_every_flushes: usize) -> Self {
        debug!(
            memory_cap_bytes,
            merge_every_flushes, "write buffer created"
        );
        Self {
            index,
            buffers: DashMap::new(),
            usage: AtomicUsize::new(0),
            memory_cap: memory_cap_bytes,
            merge_every: merge_every_flushes.max(1),
            flushes_since_merge: AtomicUsize::new(0),
            flush_gate: RwLock::new(()),
            finished: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> &Arc<TokenIndex> {
        &self.index
    }

    /// Bytes currently buffered, term keys included
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub fn memory_cap(&self) -> usize {
        self.memory_cap
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            term_count: self.buffers.len(),
            usage_bytes: self.usage(),
            memory_cap_bytes: self.memory_cap,
            flushes_since_merge: self.flushes_since_merge.load(Ordering::Acquire),
        }
    }

    /// Append one document's token for `term`, flushing first when full
    pub fn log_posting(&self, term: &str, token: &Token) -> Result<()> {
        if self.usage() >= self.memory_cap {
            self.flush()?;
        }

        let bytes = encode_token_to_vec(token);
        let _gate = self.flush_gate.read();

        let mut added = bytes.len();
        if let Some(buffer) = self.buffers.get(term) {
            buffer.lock().extend_from_slice(&bytes);
        } else {
            let entry = self.buffers.entry(term.to_string()).or_insert_with(|| {
                added += term.len();
                Mutex::new(Vec::new())
            });
            entry.lock().extend_from_slice(&bytes);
        }

        self.usage.fetch_add(added, Ordering::AcqRel);
        Ok(())
    }

    /// Log every term of one tokenized document
    pub fn log_document<'t, I>(&self, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'t str, &'t Token)>,
    {
        for (term, token) in tokens {
            self.log_posting(term, token)?;
        }
        Ok(())
    }

    /// Write all buffered terms to a new segment and reset usage.
    ///
    /// When the segment cannot be written the drained blocks are put back,
    /// so a failed flush loses nothing. Every `merge_every_flushes` flushes,
    /// segments are merged.
    pub fn flush(&self) -> Result<Option<SegmentSummary>> {
        let gate = self.flush_gate.write();
        if self.buffers.is_empty() {
            return Ok(None);
        }

        let terms: Vec<String> = self.buffers.iter().map(|entry| entry.key().clone()).collect();
        let mut blocks = Vec::with_capacity(terms.len());
        for term in terms {
            if let Some((term, buffer)) = self.buffers.remove(&term) {
                let block = buffer.into_inner();
                let block = if is_sorted_by_doc_id(&block) {
                    block
                } else {
                    overlay_token_groups([block.as_slice()])
                };
                blocks.push((term, block));
            }
        }
        let freed = self.usage.swap(0, Ordering::AcqRel);

        let written = self
            .index
            .write_segment(blocks.iter().map(|(term, block)| (term.as_str(), block.as_slice())));
        let summary = match written {
            Ok(summary) => summary,
            Err(e) => {
                let restored = blocks.len();
                for (term, block) in blocks {
                    self.buffers.insert(term, Mutex::new(block));
                }
                self.usage.fetch_add(freed, Ordering::AcqRel);
                warn!(terms = restored, error = %e, "flush failed; buffered tokens kept");
                return Err(e);
            }
        };
        drop(gate);
        debug!(freed_bytes = freed, "write buffer flushed");

        let flushes = self.flushes_since_merge.fetch_add(1, Ordering::AcqRel) + 1;
        if flushes >= self.merge_every {
            self.flushes_since_merge.store(0, Ordering::Release);
            self.index.merge()?;
        }
        Ok(summary)
    }

    /// Final flush, merge and catalog resort, in that order
    pub fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()?;
        self.index.merge()?;
        self.flushes_since_merge.store(0, Ordering::Release);
        self.index.resort_catalog()?;
        info!(
            segments = self.index.segment_count()?,
            words = self.index.words().len(),
            "write buffer finished"
        );
        Ok(())
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            if let Err(e) = self.finish() {
                error!(error = %e, "failed to finish write buffer on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::segment::codec::decode_group;
    use crate::segment::reader::SegmentReader;
    use crate::segment::types::{Posting, TermHash};
    use tempfile::TempDir;

    fn index(tmp: &TempDir) -> Arc<TokenIndex> {
        Arc::new(TokenIndex::open(IndexConfig::new(tmp.path().join("Index"))).unwrap())
    }

    fn token(doc_id: u32, position: u32) -> Token {
        Token::new(doc_id, vec![Posting::new(position, position * 6, 5)])
    }

    fn tokens_for(index: &TokenIndex, term: &str) -> Vec<Token> {
        let path = index.store().segment_paths().unwrap().pop().unwrap();
        let reader = SegmentReader::open(&path).unwrap();
        let hash = TermHash::of(term);
        let record = reader.records().map(|r| r.unwrap()).find(|r| r.hash == hash).unwrap();
        decode_group(&reader.read_record_block(&record).unwrap()).collect()
    }

    #[test]
    fn test_compute_memory_cap() {
        assert_eq!(compute_memory_cap(500, Some(16000.0)), 33 * MB);
        assert_eq!(compute_memory_cap(10, Some(16000.0)), 5 * MB);
        assert_eq!(compute_memory_cap(500, Some(200.0)), 8 * MB);
        assert_eq!(compute_memory_cap(3000, None), 120 * MB);
    }

    #[test]
    fn test_parse_mem_available() {
        let meminfo = "MemTotal:       16318412 kB\nMemFree:         1021304 kB\nMemAvailable:    8192000 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(8000.0));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_usage_counts_key_once() {
        let tmp = TempDir::new().unwrap();
        let buffer = WriteBuffer::with_cap(index(&tmp), usize::MAX, 25);

        buffer.log_posting("alpha", &token(1, 0)).unwrap();
        // "alpha" (5) + token (5)
        assert_eq!(buffer.usage(), 10);
        buffer.log_posting("alpha", &token(2, 0)).unwrap();
        assert_eq!(buffer.usage(), 15);
        assert_eq!(buffer.stats().term_count, 1);
        buffer.finish().unwrap();
    }

    #[test]
    fn test_flush_resets_and_writes_segment() {
        let tmp = TempDir::new().unwrap();
        let idx = index(&tmp);
        let buffer = WriteBuffer::with_cap(idx.clone(), usize::MAX, 25);

        buffer.log_posting("alpha", &token(1, 0)).unwrap();
        buffer.log_posting("beta", &token(1, 1)).unwrap();
        let summary = buffer.flush().unwrap().unwrap();
        assert_eq!(summary.record_count, 2);
        assert_eq!(buffer.usage(), 0);
        assert_eq!(buffer.stats().term_count, 0);
        assert!(buffer.flush().unwrap().is_none());
        assert_eq!(idx.words().len(), 2);
        buffer.finish().unwrap();
    }

    #[test]
    fn test_cap_triggers_flush_and_merge_cadence() {
        let tmp = TempDir::new().unwrap();
        let idx = index(&tmp);
        // every log exceeds a 1-byte cap, so each append flushes the previous one
        let buffer = WriteBuffer::with_cap(idx.clone(), 1, 2);

        buffer.log_posting("alpha", &token(1, 0)).unwrap();
        buffer.log_posting("alpha", &token(2, 0)).unwrap();
        assert_eq!(idx.segment_count().unwrap(), 1);
        buffer.log_posting("alpha", &token(3, 0)).unwrap();
        // second flush triggered the merge
        assert_eq!(idx.segment_count().unwrap(), 1);
        assert_eq!(buffer.stats().flushes_since_merge, 0);

        buffer.finish().unwrap();
        assert_eq!(idx.segment_count().unwrap(), 1);
        let ids: Vec<u32> = tokens_for(&idx, "alpha").iter().map(|t| t.doc_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_flush_keeps_buffered_tokens() {
        let tmp = TempDir::new().unwrap();
        let idx = index(&tmp);
        let buffer = WriteBuffer::with_cap(idx.clone(), usize::MAX, 25);

        buffer.log_posting("alpha", &token(2, 0)).unwrap();
        buffer.log_posting("alpha", &token(1, 0)).unwrap();
        buffer.log_posting("beta", &token(1, 1)).unwrap();
        let usage = buffer.usage();

        // a plain file where the segment directory should be
        let segments = idx.store().dir().to_path_buf();
        std::fs::remove_dir_all(&segments).unwrap();
        std::fs::write(&segments, b"in the way").unwrap();

        assert!(buffer.flush().is_err());
        assert_eq!(buffer.usage(), usage);
        assert_eq!(buffer.stats().term_count, 2);

        std::fs::remove_file(&segments).unwrap();
        std::fs::create_dir(&segments).unwrap();
        buffer.finish().unwrap();

        assert_eq!(tokens_for(&idx, "alpha"), vec![token(1, 0), token(2, 0)]);
        assert_eq!(tokens_for(&idx, "beta"), vec![token(1, 1)]);
    }

    #[test]
    fn test_flush_sorts_blocks_by_doc_id() {
        let tmp = TempDir::new().unwrap();
        let idx = index(&tmp);
        let buffer = WriteBuffer::with_cap(idx.clone(), usize::MAX, 25);

        buffer.log_posting("alpha", &token(9, 0)).unwrap();
        buffer.log_posting("alpha", &token(3, 0)).unwrap();
        buffer.log_posting("alpha", &token(9, 4)).unwrap();
        buffer.finish().unwrap();

        assert_eq!(tokens_for(&idx, "alpha"), vec![token(3, 0), token(9, 4)]);
    }

    #[test]
    fn test_concurrent_producers() {
        let tmp = TempDir::new().unwrap();
        let idx = index(&tmp);
        let buffer = Arc::new(WriteBuffer::with_cap(idx.clone(), usize::MAX, 25));

        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for doc in 0..50u32 {
                        let doc_id = worker * 50 + doc + 1;
                        buffer.log_posting("shared", &token(doc_id, 0)).unwrap();
                        buffer.log_posting(&format!("own{}", worker), &token(doc_id, 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        buffer.finish().unwrap();

        let shared = tokens_for(&idx, "shared");
        assert_eq!(shared.len(), 200);
        assert!(shared.windows(2).all(|w| w[0].doc_id < w[1].doc_id));
        assert_eq!(idx.words().len(), 5);
    }

    #[test]
    fn test_drop_finishes() {
        let tmp = TempDir::new().unwrap();
        let idx = index(&tmp);
        {
            let buffer = WriteBuffer::with_cap(idx.clone(), usize::MAX, 25);
            buffer.log_posting("alpha", &token(1, 0)).unwrap();
        }
        assert_eq!(idx.segment_count().unwrap(), 1);
        assert_eq!(idx.words().as_slice(), &["alpha".to_string()]);
    }
}
