use std::collections::HashMap;

use crate::config::TokenizerConfig;
use crate::segment::{DocumentId, Posting, Token};

/// One kept word occurrence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordSpan {
    pub word: String,
    pub posting: Posting,
}

/// Word scanner producing per-term tokens for one document.
///
/// Letters extend a word. Combining diacritics and `"` inside a word are
/// consumed but not kept, and `<...>` tags are skipped. Positions count kept
/// words only; char indices and lengths are in characters of the input.
pub struct Tokenizer {
    config: TokenizerConfig,
}

impl Tokenizer {
    /// Create a new tokenizer from configuration
    pub fn new(config: &TokenizerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Every kept word in document order
    pub fn scan(&self, text: &str) -> Vec<WordSpan> {
        let chars: Vec<char> = text.chars().collect();
        let mut spans = Vec::new();
        let mut word = String::with_capacity(48);
        let mut index = 0;
        let mut position = 0u32;

        while index < chars.len() {
            let c = chars[index];
            if is_letter(c) {
                let start = index;
                let mut letters = 0usize;
                word.clear();

                while index < chars.len() {
                    let c = chars[index];
                    if is_diacritic(c) || c == '"' {
                        index += 1;
                    } else if is_letter(c) {
                        word.push(c);
                        letters += 1;
                        index += 1;
                    } else if c == '<' {
                        index = skip_tag(&chars, index);
                    } else {
                        break;
                    }
                }

                if letters >= self.config.min_word_len && letters <= self.config.max_word_len {
                    let term = if self.config.lowercase {
                        word.to_lowercase()
                    } else {
                        word.clone()
                    };
                    spans.push(WordSpan {
                        word: term,
                        posting: Posting::new(position, start as u32, (index - start) as u32),
                    });
                    position += 1;
                }
            } else if c == '<' {
                index = skip_tag(&chars, index);
            } else {
                index += 1;
            }
        }

        spans
    }

    /// Group a document's words into one token per term, in order of first
    /// occurrence
    pub fn tokenize(&self, text: &str, doc_id: DocumentId) -> Vec<(String, Token)> {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut tokens: Vec<(String, Token)> = Vec::new();

        for span in self.scan(text) {
            let slot = match slots.get(&span.word) {
                Some(&slot) => slot,
                None => {
                    slots.insert(span.word.clone(), tokens.len());
                    tokens.push((span.word, Token::new(doc_id, Vec::new())));
                    tokens.len() - 1
                }
            };
            tokens[slot].1.postings.push(span.posting);
        }

        tokens
    }

    /// Get unique terms from text
    pub fn unique_terms(&self, text: &str) -> Vec<String> {
        self.tokenize(text, 0).into_iter().map(|(term, _)| term).collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(&TokenizerConfig::default())
    }
}

fn is_letter(c: char) -> bool {
    c.is_alphabetic() && !is_diacritic(c)
}

/// Combining marks consumed inside a word without being kept
pub fn is_diacritic(c: char) -> bool {
    matches!(c,
        '\u{0591}'..='\u{05C7}' if c != '\u{05BE}')
        || matches!(c,
            '\u{0300}'..='\u{036F}'
            | '\u{1AB0}'..='\u{1AFF}'
            | '\u{1DC0}'..='\u{1DFF}'
            | '\u{20D0}'..='\u{20FF}'
            | '\u{FE20}'..='\u{FE2F}')
}

/// Index just past the `>` closing the tag at `start`, or the end of input
fn skip_tag(chars: &[char], start: usize) -> usize {
    let mut index = start + 1;
    while index < chars.len() && chars[index] != '>' {
        index += 1;
    }
    (index + 1).min(chars.len())
}
