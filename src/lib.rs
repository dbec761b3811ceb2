pub mod config;
pub mod error;
pub mod indexer;
pub mod persistence;
pub mod query;
pub mod segment;
pub mod tokenizer;

pub use config::{IndexConfig, TokenizerConfig, WriteBufferConfig};
pub use error::{Result, TokenStoreError};
pub use indexer::{IndexCreator, IndexRunSummary};
pub use persistence::{DocIdStore, PlainTextSource, TextSource};
pub use query::{SearchResult, TermMatch};
pub use segment::{
    DeleteSummary, DocumentId, Posting, SearchResults, TermHash, Token, TokenIndex, WriteBuffer,
};
pub use tokenizer::Tokenizer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
