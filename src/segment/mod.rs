//! Segment-based positional inverted index
//!
//! # Architecture
//!
//! - `SegmentWriter` / `SegmentReader`: one immutable `.tks` file per segment
//!   (data blocks, sorted index table, footer)
//! - `WordCatalog`: term list aligned with the single segment's ordinals
//! - `WriteBuffer`: in-memory per-term blocks flushed into new segments
//! - `merge_segments`: k-way merge of all segments into one
//! - `TokenIndex`: owns the directory and serializes structural changes

mod buffer;
mod catalog;
pub mod codec;
mod index;
mod merge;
mod reader;
mod store;
mod types;
mod writer;

pub use buffer::*;
pub use catalog::*;
pub use index::*;
pub use merge::*;
pub use reader::*;
pub use store::*;
pub use types::*;
pub use writer::*;
