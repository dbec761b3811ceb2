//! Query resolution and streaming search
//!
//! - `matcher`: query words to word catalog ordinals (bounded wildcards)
//! - `cursor`: forward-only token cursors and per-word cursor groups
//! - `executor`: doc id merge-join plus ordered adjacency matching

pub mod cursor;
pub mod executor;
pub mod matcher;
pub mod types;

pub use cursor::{CursorGroup, TokenCursor};
pub use executor::{ordered_adjacency_match, SearchExecutor};
pub use matcher::{allowed_skip, query_terms, resolve_query, wildcard_match};
pub use types::*;
