use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::SEGMENT_EXTENSION;
use super::writer::{with_suffix, KEYS_SUFFIX, TMP_SUFFIX};
use crate::error::Result;

/// Stem of segments produced by a flush or a deletion rebuild
pub const DEFAULT_SEGMENT_NAME: &str = "tokenStore";

/// Stem of segments produced by a merge
pub const MERGED_SEGMENT_NAME: &str = "merged";

/// Suffix given to segments that failed validation
pub const CORRUPT_SUFFIX: &str = "corrupt";

/// Zero padding of the sequence number in segment names
const SEQUENCE_DIGITS: usize = 8;

/// Directory of segment files.
///
/// Only finalized `.tks` files are ever listed; partial writes carry a
/// `.tmp`/`.keys` suffix until their writer publishes them.
#[derive(Clone, Debug)]
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Finalized segments in creation order, oldest first.
    ///
    /// Order comes from the sequence number in each name. Files without one
    /// sort before all numbered segments, by path.
    pub fn segment_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXTENSION)
            {
                paths.push(path);
            }
        }
        paths.sort_by_cached_key(|p| (segment_sequence(p).unwrap_or(0), p.clone()));
        Ok(paths)
    }

    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.segment_paths()?.len())
    }

    /// Path for a new `<stem>-<seq>.tks` segment.
    ///
    /// `seq` is one more than the highest sequence of any segment file in
    /// the directory, finalized, in progress or quarantined, so names are
    /// never reused.
    pub fn next_segment_path(&self, stem: &str) -> Result<PathBuf> {
        let mut highest = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            if let Some(seq) = segment_sequence(&entry?.path()) {
                highest = highest.max(seq);
            }
        }
        Ok(self.dir.join(format!(
            "{}-{:0width$}.{}",
            stem,
            highest + 1,
            SEGMENT_EXTENSION,
            width = SEQUENCE_DIGITS
        )))
    }

    /// Delete partial segments left by an interrupted write
    pub fn recover(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let suffix = path.extension().and_then(|e| e.to_str());
            if suffix == Some(TMP_SUFFIX) || suffix == Some(KEYS_SUFFIX) {
                warn!(path = %path.display(), "removing unfinished segment file");
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Move a corrupt segment out of the listing
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        let target = with_suffix(path, CORRUPT_SUFFIX);
        fs::rename(path, &target)?;
        warn!(
            segment = %path.display(),
            moved_to = %target.display(),
            "quarantined corrupt segment"
        );
        Ok(target)
    }

    pub fn remove_segment(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sequence number of any file derived from a segment name
/// (`<stem>-<seq>.tks`, plus `.tmp`, `.keys` or `.corrupt`)
fn segment_sequence(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let marker = format!(".{}", SEGMENT_EXTENSION);
    let stem = &name[..name.find(&marker)?];
    let (_, seq) = stem.rsplit_once('-')?;
    if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    seq.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::writer::SegmentWriter;
    use tempfile::TempDir;

    fn finalize(store: &SegmentStore, stem: &str) -> PathBuf {
        let path = store.next_segment_path(stem).unwrap();
        let mut writer = SegmentWriter::create(&path).unwrap();
        writer.put_term("alpha", &[1]).unwrap();
        writer.finish().unwrap().path
    }

    #[test]
    fn test_sequence_names_and_creation_order() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path().join("segments")).unwrap();

        let first = finalize(&store, DEFAULT_SEGMENT_NAME);
        let second = finalize(&store, DEFAULT_SEGMENT_NAME);
        let merged = finalize(&store, MERGED_SEGMENT_NAME);
        let third = finalize(&store, DEFAULT_SEGMENT_NAME);

        assert!(first.ends_with("tokenStore-00000001.tks"));
        assert!(second.ends_with("tokenStore-00000002.tks"));
        assert!(merged.ends_with("merged-00000003.tks"));
        assert_eq!(
            store.segment_paths().unwrap(),
            vec![first, second, merged, third]
        );
    }

    #[test]
    fn test_names_not_reused_after_removal() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();

        let first = finalize(&store, DEFAULT_SEGMENT_NAME);
        let second = finalize(&store, DEFAULT_SEGMENT_NAME);
        store.remove_segment(&first).unwrap();
        let third = finalize(&store, DEFAULT_SEGMENT_NAME);

        assert!(third.ends_with("tokenStore-00000003.tks"));
        assert_eq!(store.segment_paths().unwrap(), vec![second, third]);
    }

    #[test]
    fn test_sequence_parsing() {
        assert_eq!(segment_sequence(Path::new("/x/tokenStore-00000012.tks")), Some(12));
        assert_eq!(segment_sequence(Path::new("merged-00000007.tks.tmp")), Some(7));
        assert_eq!(segment_sequence(Path::new("merged-00000009.tks.corrupt")), Some(9));
        assert_eq!(segment_sequence(Path::new("zzz.tks")), None);
        assert_eq!(segment_sequence(Path::new("a-b.tks")), None);
        assert_eq!(segment_sequence(Path::new("notes-3.txt")), None);
    }

    #[test]
    fn test_unnumbered_files_sort_first() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let numbered = finalize(&store, DEFAULT_SEGMENT_NAME);
        let foreign = tmp.path().join("zzz.tks");
        fs::write(&foreign, b"x").unwrap();
        assert_eq!(store.segment_paths().unwrap(), vec![foreign, numbered]);
    }

    #[test]
    fn test_recover_removes_partial_files() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let done = finalize(&store, DEFAULT_SEGMENT_NAME);

        let partial = store.next_segment_path(DEFAULT_SEGMENT_NAME).unwrap();
        let mut writer = SegmentWriter::create(&partial).unwrap();
        writer.put_term("beta", &[2]).unwrap();
        // simulate a crash mid-flush
        std::mem::forget(writer);

        // in-progress files hold their sequence number
        assert!(store
            .next_segment_path(DEFAULT_SEGMENT_NAME)
            .unwrap()
            .ends_with("tokenStore-00000003.tks"));
        assert_eq!(store.segment_paths().unwrap(), vec![done.clone()]);
        assert_eq!(store.recover().unwrap(), 2);
        assert_eq!(store.segment_paths().unwrap(), vec![done]);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_quarantine_hides_segment() {
        let tmp = TempDir::new().unwrap();
        let store = SegmentStore::new(tmp.path()).unwrap();
        let path = finalize(&store, DEFAULT_SEGMENT_NAME);

        let moved = store.quarantine(&path).unwrap();
        assert!(moved.exists());
        assert!(store.segment_paths().unwrap().is_empty());
        assert!(store
            .next_segment_path(DEFAULT_SEGMENT_NAME)
            .unwrap()
            .ends_with("tokenStore-00000002.tks"));
    }
}
