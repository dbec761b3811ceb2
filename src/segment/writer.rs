//! Segment writer for creating new immutable segments
//!
//! Blocks are appended to `<name>.tks.tmp` while their records go to an
//! unsorted `<name>.tks.keys` side file. `finish` sorts the records, appends
//! them as the index table followed by the footer, fsyncs and renames the
//! file to `<name>.tks`. Until then no reader can see the segment.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::codec::encode_token_group;
use super::types::{encode_footer, SegmentRecord, TermHash, Token, RECORD_SIZE};
use crate::error::{Result, TokenStoreError};

/// Suffix of a segment that is still being written
pub const TMP_SUFFIX: &str = "tmp";

/// Suffix of the unsorted records side file
pub const KEYS_SUFFIX: &str = "keys";

/// `<path>.<suffix>` without touching the existing extension
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Result of finalizing a segment
#[derive(Clone, Debug)]
pub struct SegmentSummary {
    /// Final `.tks` path
    pub path: PathBuf,
    /// Number of records in the index table
    pub record_count: u64,
    /// Size of the data region in bytes
    pub data_len: u64,
    /// Terms registered through `put_term`, deduplicated
    pub new_terms: Vec<String>,
}

/// Writer for one segment file
pub struct SegmentWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    keys_path: PathBuf,
    data: BufWriter<File>,
    keys: BufWriter<File>,
    offset: u64,
    record_count: u64,
    new_terms: BTreeSet<String>,
}

impl SegmentWriter {
    /// Create a writer whose finalized file will be `path`
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tmp_path = with_suffix(&path, TMP_SUFFIX);
        let keys_path = with_suffix(&path, KEYS_SUFFIX);

        let data = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let keys = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&keys_path)?;

        Ok(Self {
            path,
            tmp_path,
            keys_path,
            data: BufWriter::new(data),
            keys: BufWriter::new(keys),
            offset: 0,
            record_count: 0,
            new_terms: BTreeSet::new(),
        })
    }

    /// Final path of the segment
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to the data region so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Append a term's block and register the term as new.
    ///
    /// Empty blocks are skipped; a term with no tokens has nothing to index.
    pub fn put_term(&mut self, term: &str, block: &[u8]) -> Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        self.put_hash(TermHash::of(term), block)?;
        // lookup first so a repeated term is not allocated
        if !self.new_terms.contains(term) {
            self.new_terms.insert(term.to_string());
        }
        Ok(())
    }

    /// Append a block under an already computed hash.
    ///
    /// A zero-length block still produces a record of length 0.
    pub fn put_hash(&mut self, hash: TermHash, block: &[u8]) -> Result<()> {
        let length = u32::try_from(block.len())
            .ok()
            .filter(|len| *len <= i32::MAX as u32)
            .ok_or_else(|| {
                TokenStoreError::InvalidRequest(format!(
                    "block of {} bytes exceeds the record length limit",
                    block.len()
                ))
            })?;

        self.data.write_all(block)?;
        let record = SegmentRecord::new(hash, self.offset, length);
        self.keys.write_all(&record.encode())?;

        self.offset += length as u64;
        self.record_count += 1;
        Ok(())
    }

    /// Serialize tokens as one block and append it under `hash`
    pub fn put_tokens(&mut self, hash: TermHash, tokens: &[Token]) -> Result<()> {
        self.put_hash(hash, &encode_token_group(tokens))
    }

    /// Write the sorted index table and footer, then publish the segment.
    pub fn finish(self) -> Result<SegmentSummary> {
        let SegmentWriter {
            path,
            tmp_path,
            keys_path,
            data,
            keys,
            offset,
            record_count,
            new_terms,
        } = self;

        keys.into_inner()
            .map_err(|e| TokenStoreError::Io(e.into_error()))?
            .sync_all()?;

        let mut raw = Vec::with_capacity(record_count as usize * RECORD_SIZE);
        File::open(&keys_path)?.read_to_end(&mut raw)?;

        let mut records = Vec::with_capacity(record_count as usize);
        for chunk in raw.chunks_exact(RECORD_SIZE) {
            let record = SegmentRecord::decode(chunk).ok_or_else(|| {
                TokenStoreError::Internal(format!(
                    "unreadable record in side file {}",
                    keys_path.display()
                ))
            })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.hash.cmp(&b.hash));

        let mut data = data;
        for record in &records {
            data.write_all(&record.encode())?;
        }
        let table_len = (records.len() * RECORD_SIZE) as u64;
        data.write_all(&encode_footer(table_len).to_le_bytes())?;

        let file = data
            .into_inner()
            .map_err(|e| TokenStoreError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        fs::remove_file(&keys_path)?;
        sync_parent_dir(&path);

        debug!(
            segment = %path.display(),
            records = records.len(),
            data_len = offset,
            "finalized segment"
        );

        Ok(SegmentSummary {
            path,
            record_count,
            data_len: offset,
            new_terms: new_terms.into_iter().collect(),
        })
    }

    /// Remove the partial files of a writer that will not be finished
    pub fn abandon(self) -> Result<()> {
        let SegmentWriter {
            tmp_path,
            keys_path,
            data,
            keys,
            ..
        } = self;
        drop(data);
        drop(keys);
        remove_if_exists(&tmp_path)?;
        remove_if_exists(&keys_path)?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Persist the rename; not every platform can fsync a directory
fn sync_parent_dir(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}
