//! Token index: the segment directory, its word catalog and the lifecycle
//! lock that keeps them consistent
//!
//! Structural changes (flush, merge, delete, resort) take the lifecycle lock
//! exclusively and end with a single `rebuild_catalog`. A search holds the
//! lock shared for as long as its result iterator is alive, so no segment it
//! reads can be replaced underneath it.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use super::catalog::WordCatalog;
use super::codec::TokenSlices;
use super::merge::{merge_segments, MergeSummary};
use super::reader::SegmentReader;
use super::store::{SegmentStore, DEFAULT_SEGMENT_NAME};
use super::types::{DocumentId, TermHash};
use super::writer::{SegmentSummary, SegmentWriter};
use crate::config::IndexConfig;
use crate::error::{Result, TokenStoreError};
use crate::query::{resolve_query, SearchExecutor, SearchResult, TermMatch};

/// Outcome of a deletion rebuild
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Tokens dropped across all terms
    pub removed_tokens: u64,
    /// Records in the rebuilt segment
    pub records: u64,
}

/// The on-disk index
pub struct TokenIndex {
    config: IndexConfig,
    store: SegmentStore,
    catalog: WordCatalog,
    lifecycle: RwLock<()>,
}

impl TokenIndex {
    /// Open (or create) the index under `config.index_dir`.
    ///
    /// Unfinished segment files from an interrupted write are removed.
    pub fn open(config: IndexConfig) -> Result<Self> {
        fs::create_dir_all(&config.index_dir)?;
        let store = SegmentStore::new(config.segments_dir())?;
        let removed = store.recover()?;
        let catalog = WordCatalog::open(config.words_path())?;

        info!(
            index_dir = %config.index_dir.display(),
            segments = store.segment_count()?,
            words = catalog.len(),
            recovered = removed,
            "opened token index"
        );

        Ok(Self {
            config,
            store,
            catalog,
            lifecycle: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn segment_count(&self) -> Result<usize> {
        self.store.segment_count()
    }

    /// Snapshot of the word catalog
    pub fn words(&self) -> Arc<Vec<String>> {
        self.catalog.words()
    }

    /// Write one new segment from `(term, block)` pairs.
    ///
    /// Returns `None` when there is nothing to write.
    pub fn write_segment<I, T, B>(&self, blocks: I) -> Result<Option<SegmentSummary>>
    where
        I: IntoIterator<Item = (T, B)>,
        T: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let _guard = self.lifecycle.write();
        let mut blocks = blocks.into_iter().peekable();
        if blocks.peek().is_none() {
            return Ok(None);
        }

        let started = Instant::now();
        let mut writer = SegmentWriter::create(self.store.next_segment_path(DEFAULT_SEGMENT_NAME)?)?;
        for (term, block) in blocks {
            if let Err(e) = writer.put_term(term.as_ref(), block.as_ref()) {
                writer.abandon()?;
                return Err(e);
            }
        }
        let summary = writer.finish()?;

        info!(
            segment = %summary.path.display(),
            records = summary.record_count,
            bytes = summary.data_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed segment"
        );

        self.rebuild_catalog(&summary.new_terms)?;
        Ok(Some(summary))
    }

    /// Merge every segment into one and realign the catalog.
    ///
    /// The catalog is rebuilt whenever the segment set changed, including
    /// when corrupt segments were only quarantined.
    pub fn merge(&self) -> Result<Option<MergeSummary>> {
        let _guard = self.lifecycle.write();
        let summary = merge_segments(&self.store)?;
        if summary.is_some() {
            self.rebuild_catalog(&[])?;
        }
        Ok(summary)
    }

    /// Realign the catalog with the current segment
    pub fn resort_catalog(&self) -> Result<()> {
        let _guard = self.lifecycle.write();
        self.rebuild_catalog(&[])
    }

    /// Rebuild the segment without any token of `doc_ids`.
    ///
    /// Multiple segments are merged first. A term left with no documents
    /// keeps a zero-length record, so catalog ordinals do not shift.
    pub fn delete_documents(&self, doc_ids: &HashSet<DocumentId>) -> Result<DeleteSummary> {
        let _guard = self.lifecycle.write();
        if doc_ids.is_empty() {
            return Ok(DeleteSummary::default());
        }

        if self.store.segment_count()? > 1 {
            merge_segments(&self.store)?;
        }
        let Some(source) = self.store.segment_paths()?.pop() else {
            self.rebuild_catalog(&[])?;
            return Ok(DeleteSummary::default());
        };

        let started = Instant::now();
        let reader = SegmentReader::open(&source)?;
        let mut writer = SegmentWriter::create(self.store.next_segment_path(DEFAULT_SEGMENT_NAME)?)?;

        let mut summary = DeleteSummary::default();
        let rebuilt = filter_segment(&reader, &mut writer, doc_ids, &mut summary);
        if let Err(e) = rebuilt {
            writer.abandon()?;
            return Err(e);
        }
        let output = writer.finish()?;
        summary.records = output.record_count;

        drop(reader);
        self.store.remove_segment(&source)?;

        info!(
            documents = doc_ids.len(),
            removed_tokens = summary.removed_tokens,
            records = summary.records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "deleted documents"
        );

        self.rebuild_catalog(&[])?;
        Ok(summary)
    }

    /// Resolve `query` and stream the matching documents.
    ///
    /// `adjacency` is the number of other words allowed between consecutive
    /// query words. The returned iterator holds the lifecycle lock shared.
    pub fn search(&self, query: &str, adjacency: u32) -> Result<SearchResults<'_>> {
        let guard = self.lifecycle.read();
        let words = self.catalog.words();
        let terms = resolve_query(query, &words);

        let paths = self.store.segment_paths()?;
        if paths.len() > 1 {
            return Err(TokenStoreError::InvalidRequest(format!(
                "index has {} unmerged segments; merge before searching",
                paths.len()
            )));
        }

        let executor = match paths.first() {
            Some(path) if !terms.is_empty() && terms.iter().all(|t| !t.is_unresolved()) => {
                Some(SearchExecutor::new(SegmentReader::open(path)?, &terms, adjacency)?)
            }
            _ => None,
        };

        debug!(query, words = terms.len(), "search started");
        Ok(SearchResults {
            _guard: guard,
            terms,
            executor,
        })
    }

    /// Union `new_terms` into the catalog and, when exactly one segment
    /// exists, realign it with that segment's ordinals.
    fn rebuild_catalog(&self, new_terms: &[String]) -> Result<()> {
        self.catalog.add_terms(new_terms)?;

        let paths = self.store.segment_paths()?;
        if paths.is_empty() {
            // no records left for any line to name
            if !self.catalog.is_empty() {
                self.catalog.resort(&[])?;
            }
            return Ok(());
        }
        if paths.len() > 1 {
            debug!(segments = paths.len(), "catalog left in append order until merge");
            return Ok(());
        }

        let reader = SegmentReader::open(&paths[0])?;
        let hashes: Vec<TermHash> = reader
            .records()
            .map(|r| r.map(|record| record.hash))
            .collect::<Result<_>>()?;
        self.catalog.resort(&hashes)?;

        let orphans = self.catalog.words().iter().filter(|w| w.is_empty()).count();
        if orphans > 0 {
            warn!(orphans, "segment records with no catalog term");
        }
        debug!(records = hashes.len(), generation = self.catalog.generation(), "catalog realigned");
        Ok(())
    }
}

fn filter_segment(
    reader: &SegmentReader,
    writer: &mut SegmentWriter,
    doc_ids: &HashSet<DocumentId>,
    summary: &mut DeleteSummary,
) -> Result<()> {
    for record in reader.records() {
        let record = record?;
        let block = reader.read_record_block(&record)?;

        let mut kept = Vec::with_capacity(block.len());
        for (doc_id, raw) in TokenSlices::new(&block) {
            if doc_ids.contains(&doc_id) {
                summary.removed_tokens += 1;
            } else {
                kept.extend_from_slice(raw);
            }
        }
        writer.put_hash(record.hash, &kept)?;
    }
    Ok(())
}

/// Streaming search results; holds the index lifecycle lock shared
pub struct SearchResults<'a> {
    _guard: RwLockReadGuard<'a, ()>,
    terms: Vec<TermMatch>,
    executor: Option<SearchExecutor>,
}

impl<'a> SearchResults<'a> {
    /// How each query word resolved against the catalog
    pub fn terms(&self) -> &[TermMatch] {
        &self.terms
    }
}

impl<'a> Iterator for SearchResults<'a> {
    type Item = Result<SearchResult>;

    fn next(&mut self) -> Option<Self::Item> {
        self.executor.as_mut()?.next()
    }
}
