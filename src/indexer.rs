//! Parallel indexing runs
//!
//! The calling thread assigns document ids in input order and feeds a
//! bounded channel; worker threads extract text, tokenize it and log the
//! tokens into one shared `WriteBuffer`. The run ends with the buffer's
//! flush, merge and catalog resort.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{Result, TokenStoreError};
use crate::persistence::{DocIdStore, PlainTextSource, TextSource};
use crate::segment::{DeleteSummary, DocumentId, TokenIndex, WriteBuffer};
use crate::tokenizer::Tokenizer;

/// Documents waiting per worker before the dispatcher blocks
const QUEUE_DEPTH_PER_WORKER: usize = 16;

/// Counts from one indexing run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexRunSummary {
    /// Documents whose tokens were logged
    pub indexed: u64,
    /// Documents with no indexable words
    pub skipped: u64,
    /// Documents that could not be read or assigned an id
    pub failed: u64,
}

#[derive(Default)]
struct RunCounters {
    indexed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    fn summary(&self) -> IndexRunSummary {
        IndexRunSummary {
            indexed: self.indexed.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

/// Builds and maintains an index from documents on disk
pub struct IndexCreator {
    config: IndexConfig,
    index: Arc<TokenIndex>,
    doc_ids: Arc<DocIdStore>,
    source: Arc<dyn TextSource>,
}

impl IndexCreator {
    /// Open the token index and document id store under `config.index_dir`
    pub fn open(config: IndexConfig) -> Result<Self> {
        let index = Arc::new(TokenIndex::open(config.clone())?);
        let doc_ids = Arc::new(DocIdStore::open(config.doc_ids_dir())?);
        Ok(Self {
            config,
            index,
            doc_ids,
            source: Arc::new(PlainTextSource),
        })
    }

    /// Replace the plain-text reader
    pub fn with_source(mut self, source: Arc<dyn TextSource>) -> Self {
        self.source = source;
        self
    }

    pub fn index(&self) -> &Arc<TokenIndex> {
        &self.index
    }

    pub fn doc_ids(&self) -> &DocIdStore {
        &self.doc_ids
    }

    /// Index every path, then flush, merge and resort.
    ///
    /// A document that fails is logged and skipped. Errors from the write
    /// buffer abort the run.
    pub fn run<I, P>(&self, paths: I) -> Result<IndexRunSummary>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let started = Instant::now();
        let workers = self.config.workers.max(1);
        let buffer = Arc::new(WriteBuffer::new(self.index.clone()));
        let counters = Arc::new(RunCounters::default());
        let (tx, rx) = bounded::<(DocumentId, PathBuf)>(workers * QUEUE_DEPTH_PER_WORKER);

        let handles: Vec<thread::JoinHandle<Result<()>>> = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                let buffer = buffer.clone();
                let source = self.source.clone();
                let counters = counters.clone();
                let tokenizer = Tokenizer::new(&self.config.tokenizer);
                thread::spawn(move || index_worker(rx, &buffer, source.as_ref(), &tokenizer, &counters))
            })
            .collect();
        drop(rx);

        for path in paths {
            let path = path.as_ref();
            match self.doc_ids.resolve_or_assign(path) {
                Ok(doc_id) => {
                    // every worker has exited when the send fails
                    if tx.send((doc_id, path.to_path_buf())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to assign document id");
                    counters.failed.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
        drop(tx);

        let mut first_error = None;
        for handle in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(TokenStoreError::Internal("indexing worker panicked".to_string())));
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        buffer.finish()?;
        let summary = counters.summary();
        info!(
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexing run complete"
        );
        Ok(summary)
    }

    /// Remove the given documents from the index. Paths that were never
    /// indexed are ignored.
    pub fn delete_paths<I, P>(&self, paths: I) -> Result<DeleteSummary>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut doc_ids = HashSet::new();
        for path in paths {
            let path = path.as_ref();
            match self.doc_ids.id_of(path)? {
                Some(id) => {
                    doc_ids.insert(id);
                }
                None => debug!(path = %path.display(), "delete of unknown document ignored"),
            }
        }
        self.index.delete_documents(&doc_ids)
    }
}

fn index_worker(
    rx: Receiver<(DocumentId, PathBuf)>,
    buffer: &WriteBuffer,
    source: &dyn TextSource,
    tokenizer: &Tokenizer,
    counters: &RunCounters,
) -> Result<()> {
    while let Ok((doc_id, path)) = rx.recv() {
        let text = match source.extract_text(&path) {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(path = %path.display(), "no text to index");
                counters.skipped.fetch_add(1, Ordering::AcqRel);
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read document");
                counters.failed.fetch_add(1, Ordering::AcqRel);
                continue;
            }
        };

        let tokens = tokenizer.tokenize(&text, doc_id);
        if tokens.is_empty() {
            counters.skipped.fetch_add(1, Ordering::AcqRel);
            continue;
        }
        buffer.log_document(tokens.iter().map(|(term, token)| (term.as_str(), token)))?;
        counters.indexed.fetch_add(1, Ordering::AcqRel);
    }
    Ok(())
}
