//! Immutable segment reader
//!
//! The index table is located from the footer alone. Two independent file
//! handles are kept: one walks the index table, the other serves random
//! block reads, so table iteration can interleave with block fetches.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::codec::decode_group;
use super::types::{decode_footer, SegmentRecord, Token, FOOTER_SIZE, MAGIC_MARKER, RECORD_SIZE};
use crate::error::{Result, TokenStoreError};

/// Records fetched per index table read when iterating
const RECORD_BATCH: u64 = 1024;

/// Read-only view over one finalized segment file
pub struct SegmentReader {
    path: PathBuf,
    /// Handle used for index table traversal
    table: Mutex<File>,
    /// Handle used for data block reads
    data: Mutex<File>,
    /// Start of the index table; also the length of the data region
    table_start: u64,
    record_count: u64,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("path", &self.path)
            .field("table_start", &self.table_start)
            .field("record_count", &self.record_count)
            .finish()
    }
}

impl SegmentReader {
    /// Open a segment and validate its footer
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut table = File::open(&path)?;
        let data = File::open(&path)?;

        let file_len = table.metadata()?.len();
        if file_len < FOOTER_SIZE {
            return Err(TokenStoreError::corruption(&path, "file shorter than footer"));
        }

        table.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        table.read_exact(&mut footer)?;
        let (marker, table_len) = decode_footer(u64::from_le_bytes(footer));

        if marker != MAGIC_MARKER {
            return Err(TokenStoreError::corruption(
                &path,
                format!("bad magic marker {:#06x}", marker),
            ));
        }
        if table_len % RECORD_SIZE as u64 != 0 {
            return Err(TokenStoreError::corruption(
                &path,
                format!("index table length {} is not a multiple of {}", table_len, RECORD_SIZE),
            ));
        }
        let table_start = (file_len - FOOTER_SIZE).checked_sub(table_len).ok_or_else(|| {
            TokenStoreError::corruption(
                &path,
                format!("index table length {} exceeds file length {}", table_len, file_len),
            )
        })?;

        Ok(Self {
            path,
            table: Mutex::new(table),
            data: Mutex::new(data),
            table_start,
            record_count: table_len / RECORD_SIZE as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the index table
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Length of the data region
    pub fn data_len(&self) -> u64 {
        self.table_start
    }

    /// The record at `ordinal` of the sorted index table (direct seek)
    pub fn record_at(&self, ordinal: u64) -> Result<SegmentRecord> {
        if ordinal >= self.record_count {
            return Err(TokenStoreError::OrdinalOutOfRange {
                ordinal,
                count: self.record_count,
            });
        }
        let mut buf = [0u8; RECORD_SIZE];
        {
            let mut table = self.table.lock();
            table.seek(SeekFrom::Start(self.table_start + ordinal * RECORD_SIZE as u64))?;
            table.read_exact(&mut buf)?;
        }
        self.decode_record(&buf)
    }

    /// Lazy iterator over all records in ascending hash order.
    ///
    /// Every call starts again from the first record.
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter {
            reader: self,
            next_ordinal: 0,
            pending: VecDeque::new(),
        }
    }

    /// Read `length` bytes of the data region starting at `offset`
    pub fn read_block(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let end = offset.checked_add(length as u64);
        if end.map_or(true, |end| end > self.table_start) {
            return Err(TokenStoreError::corruption(
                &self.path,
                format!(
                    "block at {} of length {} runs past the data region ({})",
                    offset, length, self.table_start
                ),
            ));
        }

        let mut buf = vec![0u8; length as usize];
        if length > 0 {
            let mut data = self.data.lock();
            data.seek(SeekFrom::Start(offset))?;
            data.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    /// Read the whole block a record points at
    pub fn read_record_block(&self, record: &SegmentRecord) -> Result<Vec<u8>> {
        self.read_block(record.offset, record.length)
    }

    /// Every record paired with its decoded tokens, in table order
    pub fn token_groups(&self) -> impl Iterator<Item = Result<(SegmentRecord, Vec<Token>)>> + '_ {
        self.records().map(move |record| {
            let record = record?;
            let block = self.read_record_block(&record)?;
            Ok((record, decode_group(&block).collect()))
        })
    }

    fn decode_record(&self, bytes: &[u8]) -> Result<SegmentRecord> {
        let record = SegmentRecord::decode(bytes)
            .ok_or_else(|| TokenStoreError::corruption(&self.path, "negative record offset or length"))?;
        if record.end() > self.table_start {
            return Err(TokenStoreError::corruption(
                &self.path,
                format!("record block ends at {} past data region {}", record.end(), self.table_start),
            ));
        }
        Ok(record)
    }

    fn read_batch(&self, start: u64, count: u64) -> Result<Vec<SegmentRecord>> {
        let mut buf = vec![0u8; (count as usize) * RECORD_SIZE];
        {
            let mut table = self.table.lock();
            table.seek(SeekFrom::Start(self.table_start + start * RECORD_SIZE as u64))?;
            table.read_exact(&mut buf)?;
        }
        buf.chunks_exact(RECORD_SIZE)
            .map(|chunk| self.decode_record(chunk))
            .collect()
    }
}

/// Forward iterator over a segment's index table, read in batches
pub struct RecordIter<'a> {
    reader: &'a SegmentReader,
    next_ordinal: u64,
    pending: VecDeque<SegmentRecord>,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<SegmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.pending.pop_front() {
            return Some(Ok(record));
        }
        let remaining = self.reader.record_count.saturating_sub(self.next_ordinal);
        if remaining == 0 {
            return None;
        }

        let count = remaining.min(RECORD_BATCH);
        match self.reader.read_batch(self.next_ordinal, count) {
            Ok(batch) => {
                self.next_ordinal += count;
                self.pending.extend(batch);
                self.pending.pop_front().map(Ok)
            }
            Err(e) => {
                self.next_ordinal = self.reader.record_count;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.pending.len()
            + self.reader.record_count.saturating_sub(self.next_ordinal) as usize;
        (0, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::codec::encode_token_group;
    use crate::segment::types::{encode_footer, Posting, TermHash};
    use crate::segment::writer::SegmentWriter;
    use tempfile::TempDir;

    fn write_segment(dir: &Path, terms: &[(&str, Vec<u8>)]) -> PathBuf {
        let path = dir.join("seg.tks");
        let mut writer = SegmentWriter::create(&path).unwrap();
        for (term, block) in terms {
            writer.put_term(term, block).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_records_sorted_and_direct_access() {
        let tmp = TempDir::new().unwrap();
        let terms: Vec<(String, Vec<u8>)> = (0..50)
            .map(|i| (format!("term{}", i), vec![i as u8; (i % 4) + 1]))
            .collect();
        let borrowed: Vec<(&str, Vec<u8>)> =
            terms.iter().map(|(t, b)| (t.as_str(), b.clone())).collect();
        let path = write_segment(tmp.path(), &borrowed);

        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.record_count(), 50);

        let records: Vec<SegmentRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 50);
        assert!(records.windows(2).all(|w| w[0].hash <= w[1].hash));

        for (i, record) in records.iter().enumerate() {
            assert_eq!(&reader.record_at(i as u64).unwrap(), record);
        }

        // restartable
        assert_eq!(reader.records().count(), 50);
    }

    #[test]
    fn test_read_block_by_term() {
        let tmp = TempDir::new().unwrap();
        let path = write_segment(tmp.path(), &[("alpha", vec![1, 2, 3]), ("beta", vec![9])]);
        let reader = SegmentReader::open(&path).unwrap();

        let alpha = TermHash::of("alpha");
        let record = reader
            .records()
            .map(|r| r.unwrap())
            .find(|r| r.hash == alpha)
            .unwrap();
        assert_eq!(reader.read_record_block(&record).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ordinal_out_of_range() {
        let tmp = TempDir::new().unwrap();
        let path = write_segment(tmp.path(), &[("alpha", vec![1])]);
        let reader = SegmentReader::open(&path).unwrap();
        assert!(matches!(
            reader.record_at(1),
            Err(TokenStoreError::OrdinalOutOfRange { ordinal: 1, count: 1 })
        ));
    }

    #[test]
    fn test_zero_length_record_reads_empty_block() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("z.tks");
        let mut writer = SegmentWriter::create(&path).unwrap();
        writer.put_hash(TermHash::of("gone"), &[]).unwrap();
        writer.finish().unwrap();

        let reader = SegmentReader::open(&path).unwrap();
        let record = reader.record_at(0).unwrap();
        assert_eq!(record.length, 0);
        assert!(reader.read_record_block(&record).unwrap().is_empty());
        let groups: Vec<_> = reader.token_groups().map(|g| g.unwrap()).collect();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].1.is_empty());
    }

    #[test]
    fn test_token_groups_decode() {
        let tmp = TempDir::new().unwrap();
        let tokens = vec![
            Token::new(1, vec![Posting::new(0, 0, 5)]),
            Token::new(2, vec![Posting::new(3, 17, 5)]),
        ];
        let path = write_segment(tmp.path(), &[("alpha", encode_token_group(&tokens))]);
        let reader = SegmentReader::open(&path).unwrap();

        let groups: Vec<_> = reader.token_groups().map(|g| g.unwrap()).collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0.hash, TermHash::of("alpha"));
        assert_eq!(groups[0].1, tokens);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.tks");
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&0x1234u64.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let err = SegmentReader::open(&path).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_oversize_table_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.tks");
        let mut bytes = vec![0u8; 10];
        bytes.extend_from_slice(&encode_footer(44 * 100).to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let err = SegmentReader::open(&path).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_short_file_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("short.tks");
        std::fs::write(&path, [0xFE, 0xCA]).unwrap();
        assert!(SegmentReader::open(&path).unwrap_err().is_corruption());
    }

    #[test]
    fn test_empty_segment() {
        let tmp = TempDir::new().unwrap();
        let path = write_segment(tmp.path(), &[]);
        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.record_count(), 0);
        assert_eq!(reader.records().count(), 0);
    }
}
