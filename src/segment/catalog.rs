//! Word catalog
//!
//! A newline-delimited list of every known term. With a single segment,
//! line `i` names the term whose record sits at ordinal `i` of that
//! segment's sorted index table, so a query can go from a catalog line
//! straight to `record_at(i)` without hashing.
//!
//! The file is rewritten through a temp file and an atomic rename.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::types::TermHash;
use crate::error::{Result, TokenStoreError};

/// Rebuild the catalog in segment order.
///
/// Line `i` of the result is the existing term whose hash equals
/// `sorted_hashes[i]`, or an empty line when no known term matches.
pub fn align_catalog(existing: &[String], sorted_hashes: &[TermHash]) -> Vec<String> {
    let mut by_hash: HashMap<TermHash, &str> = HashMap::with_capacity(existing.len());
    for term in existing.iter().filter(|t| !t.is_empty()) {
        by_hash.entry(TermHash::of(term)).or_insert(term.as_str());
    }

    sorted_hashes
        .iter()
        .map(|hash| by_hash.get(hash).map(|t| t.to_string()).unwrap_or_default())
        .collect()
}

/// Append the terms not yet present, keeping existing lines in place
pub fn union_terms(existing: &[String], new_terms: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = existing.iter().map(|t| t.as_str()).collect();
    let mut out = existing.to_vec();
    for term in new_terms {
        if !term.is_empty() && seen.insert(term.as_str()) {
            out.push(term.clone());
        }
    }
    out
}

struct CatalogState {
    generation: u64,
    words: Arc<Vec<String>>,
}

/// The on-disk word catalog plus an in-memory snapshot of its lines
pub struct WordCatalog {
    path: PathBuf,
    state: RwLock<CatalogState>,
}

impl WordCatalog {
    /// Load the catalog at `path`; a missing file is an empty catalog
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let words = match fs::read(&path) {
            Ok(bytes) => parse_lines(&bytes, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: RwLock::new(CatalogState {
                generation: 0,
                words: Arc::new(words),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current lines
    pub fn words(&self) -> Arc<Vec<String>> {
        self.state.read().words.clone()
    }

    /// Number of rewrites since the catalog was opened
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn len(&self) -> usize {
        self.state.read().words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add newly flushed terms without reordering
    pub fn add_terms(&self, new_terms: &[String]) -> Result<()> {
        let current = self.words();
        let updated = union_terms(&current, new_terms);
        if updated.len() == current.len() {
            return Ok(());
        }
        self.replace(updated)
    }

    /// Re-derive line order from a segment's sorted record hashes
    pub fn resort(&self, sorted_hashes: &[TermHash]) -> Result<()> {
        let current = self.words();
        let aligned = align_catalog(&current, sorted_hashes);
        self.replace(aligned)
    }

    fn replace(&self, words: Vec<String>) -> Result<()> {
        write_atomic(&self.path, &words)?;
        let mut state = self.state.write();
        state.generation += 1;
        state.words = Arc::new(words);
        Ok(())
    }
}

fn parse_lines(bytes: &[u8], path: &Path) -> Result<Vec<String>> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        TokenStoreError::Catalog(format!("{} is not valid UTF-8: {}", path.display(), e))
    })?;
    Ok(text
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

fn write_atomic(path: &Path, words: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = super::writer::with_suffix(path, "tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for word in words {
            out.write_all(word.as_bytes())?;
            out.write_all(b"\n")?;
        }
        let file = out
            .into_inner()
            .map_err(|e| TokenStoreError::Io(e.into_error()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
