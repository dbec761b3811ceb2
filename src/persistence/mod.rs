//! Persistence around the index: the Fjall-backed document id store and
//! document text sources.

mod doc_ids;
mod text;

pub use doc_ids::DocIdStore;
pub use text::{PlainTextSource, TextSource};
