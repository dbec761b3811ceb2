//! Document text to per-term tokens

#[allow(clippy::module_inception)]
mod tokenizer;

pub use tokenizer::*;
