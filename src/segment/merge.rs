//! Segment merge
//!
//! External k-way merge of every finalized segment into one. Readers are
//! walked in hash order; all readers positioned at the smallest hash form a
//! merge group whose blocks are overlaid per document, later segments (in
//! store order) replacing earlier tokens wholesale.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::codec::overlay_token_groups;
use super::reader::{RecordIter, SegmentReader};
use super::store::{SegmentStore, MERGED_SEGMENT_NAME};
use super::types::{SegmentRecord, TermHash};
use super::writer::{SegmentSummary, SegmentWriter};
use crate::error::Result;

/// Outcome of a merge that changed the segment set
#[derive(Clone, Debug)]
pub struct MergeSummary {
    /// The merged segment; `None` when quarantine left nothing to merge
    pub output: Option<SegmentSummary>,
    /// Segments consumed and deleted
    pub inputs: Vec<PathBuf>,
    /// Segments set aside because they failed to open
    pub quarantined: Vec<PathBuf>,
}

struct MergeCursor<'a> {
    reader: &'a SegmentReader,
    records: RecordIter<'a>,
    current: SegmentRecord,
}

impl<'a> MergeCursor<'a> {
    fn start(reader: &'a SegmentReader) -> Result<Option<Self>> {
        let mut records = reader.records();
        match records.next() {
            Some(record) => Ok(Some(Self {
                reader,
                records,
                current: record?,
            })),
            None => Ok(None),
        }
    }

    /// Move to the next record; `false` once exhausted
    fn advance(&mut self) -> Result<bool> {
        match self.records.next() {
            Some(record) => {
                self.current = record?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Merge all segments of `store` into one.
///
/// Returns `None` when the segment set is unchanged. A merge that only
/// quarantined corrupt segments reports them with no output.
pub fn merge_segments(store: &SegmentStore) -> Result<Option<MergeSummary>> {
    let paths = store.segment_paths()?;
    if paths.len() <= 1 {
        return Ok(None);
    }

    let started = Instant::now();
    let mut readers = Vec::with_capacity(paths.len());
    let mut quarantined = Vec::new();
    for path in &paths {
        match SegmentReader::open(path) {
            Ok(reader) => readers.push(reader),
            Err(e) if e.is_corruption() => {
                warn!(segment = %path.display(), error = %e, "skipping corrupt segment");
                quarantined.push(store.quarantine(path)?);
            }
            Err(e) => return Err(e),
        }
    }
    if readers.len() <= 1 {
        if quarantined.is_empty() {
            return Ok(None);
        }
        return Ok(Some(MergeSummary {
            output: None,
            inputs: Vec::new(),
            quarantined,
        }));
    }

    let output_path = store.next_segment_path(MERGED_SEGMENT_NAME)?;
    let mut writer = SegmentWriter::create(&output_path)?;

    if let Err(e) = merge_into(&readers, &mut writer) {
        writer.abandon()?;
        return Err(e);
    }
    let output = writer.finish()?;

    let inputs: Vec<PathBuf> = readers.iter().map(|r| r.path().to_path_buf()).collect();
    drop(readers);
    for path in &inputs {
        if path != &output.path {
            store.remove_segment(path)?;
        }
    }

    info!(
        inputs = inputs.len(),
        records = output.record_count,
        bytes = output.data_len,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "merged segments"
    );

    Ok(Some(MergeSummary {
        output: Some(output),
        inputs,
        quarantined,
    }))
}

/// Drive the k-way merge of `readers` (in store order) into `writer`
pub fn merge_into(readers: &[SegmentReader], writer: &mut SegmentWriter) -> Result<u64> {
    let mut active = Vec::with_capacity(readers.len());
    for reader in readers {
        match MergeCursor::start(reader)? {
            Some(cursor) => active.push(cursor),
            None => debug!(segment = %reader.path().display(), "segment has no records"),
        }
    }

    let mut groups = 0u64;
    while let Some(min_hash) = active.iter().map(|c| c.current.hash).min() {
        merge_group(&mut active, min_hash, writer)?;
        groups += 1;
    }
    Ok(groups)
}

fn merge_group(
    active: &mut Vec<MergeCursor<'_>>,
    hash: TermHash,
    writer: &mut SegmentWriter,
) -> Result<()> {
    let mut blocks = Vec::new();
    for cursor in active.iter().filter(|c| c.current.hash == hash) {
        blocks.push(cursor.reader.read_record_block(&cursor.current)?);
    }

    let merged = overlay_token_groups(blocks.iter().map(|b| b.as_slice()));
    writer.put_hash(hash, &merged)?;

    let mut index = 0;
    while index < active.len() {
        if active[index].current.hash == hash && !active[index].advance()? {
            active.remove(index);
        } else {
            index += 1;
        }
    }
    Ok(())
}
