use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TokenStoreError};

/// Index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Root directory holding segments, the word catalog and the doc id store
    pub index_dir: PathBuf,
    pub buffer: WriteBufferConfig,
    pub tokenizer: TokenizerConfig,
    /// Worker threads used by an indexing run
    pub workers: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./Index"),
            buffer: WriteBufferConfig::default(),
            tokenizer: TokenizerConfig::default(),
            workers: num_cpus::get(),
        }
    }
}

impl IndexConfig {
    /// Create a configuration rooted at `index_dir`
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            TokenStoreError::InvalidRequest(format!(
                "invalid config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Set the requested write buffer memory cap (MB)
    pub fn with_memory_cap_mb(mut self, mb: usize) -> Self {
        self.buffer.memory_cap_mb = mb;
        self
    }

    /// Set how many flushes trigger an automatic merge
    pub fn with_merge_every_flushes(mut self, flushes: usize) -> Self {
        self.buffer.merge_every_flushes = flushes;
        self
    }

    /// Set the number of indexing workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Directory holding segment files
    pub fn segments_dir(&self) -> PathBuf {
        self.index_dir.join("segments")
    }

    /// Path of the newline-delimited word catalog
    pub fn words_path(&self) -> PathBuf {
        self.index_dir.join("wordsStore.txt")
    }

    /// Directory of the document id store
    pub fn doc_ids_dir(&self) -> PathBuf {
        self.index_dir.join("idStore")
    }
}

/// Write buffer (WAL) configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBufferConfig {
    /// Requested memory cap in MB, scaled down by `compute_memory_cap`
    pub memory_cap_mb: usize,
    /// Number of flushes after which segments are merged automatically
    pub merge_every_flushes: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            memory_cap_mb: 500,
            merge_every_flushes: 25,
        }
    }
}

/// Tokenizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub min_word_len: usize,
    pub max_word_len: usize,
    pub lowercase: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_word_len: 2,
            max_word_len: 44,
            lowercase: true,
        }
    }
}
