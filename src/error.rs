use std::path::PathBuf;

use thiserror::Error;

/// Main error type for tokenstore operations
#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt segment {}: {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("Ordinal {ordinal} out of range for index table of {count} records")]
    OrdinalOutOfRange { ordinal: u64, count: u64 },

    #[error("Word catalog error: {0}")]
    Catalog(String),

    #[error("Document id store error: {0}")]
    DocIdStore(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for tokenstore operations
pub type Result<T> = std::result::Result<T, TokenStoreError>;

impl TokenStoreError {
    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TokenStoreError::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Segment-level corruption: the segment is unusable but the engine is not.
    pub fn is_corruption(&self) -> bool {
        matches!(self, TokenStoreError::Corruption { .. })
    }
}
