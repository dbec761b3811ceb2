use std::path::Path;

use crate::Result;

/// Produces the text of a source document
pub trait TextSource: Send + Sync {
    /// `None` when the document has no indexable text
    fn extract_text(&self, path: &Path) -> Result<Option<String>>;
}

/// Reads files as UTF-8, replacing invalid sequences
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextSource;

impl TextSource for PlainTextSource {
    fn extract_text(&self, path: &Path) -> Result<Option<String>> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(text.into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_text() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"alpha \xFF beta").unwrap();
        let text = PlainTextSource.extract_text(&path).unwrap().unwrap();
        assert!(text.starts_with("alpha"));
        assert!(text.ends_with("beta"));
    }

    #[test]
    fn test_blank_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blank.txt");
        std::fs::write(&path, " \n\t ").unwrap();
        assert!(PlainTextSource.extract_text(&path).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(PlainTextSource.extract_text(&tmp.path().join("missing")).is_err());
    }
}
