//! Query word matching against the word catalog
//!
//! Supports:
//! - `*` - matches a run of characters (including empty), within the skip budget
//! - `?` - matches exactly one character
//!
//! Backtracking after a `*` is bounded by a skip budget that depends on how
//! many literal characters the pattern has. The same budget lets a plain
//! pattern with a `*` tolerate a few extra characters around it.

use super::types::TermMatch;

/// Backtracking budget for a pattern
pub fn allowed_skip(pattern: &[char]) -> usize {
    let literals = pattern.iter().filter(|c| **c != '*' && **c != '?').count();
    match literals {
        0 | 1 => 2,
        2 => 3,
        _ => 5,
    }
}

/// Bounded wildcard match of `word` against `pattern`
pub fn wildcard_match(pattern: &str, word: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let word: Vec<char> = word.chars().collect();
    match_chars(&pattern, &word, allowed_skip(&pattern))
}

fn match_chars(pattern: &[char], word: &[char], budget: usize) -> bool {
    let mut p = 0;
    let mut s = 0;
    let mut star: Option<usize> = None;
    let mut resume = 0;
    let mut skips = 0;

    while s < word.len() {
        if p < pattern.len() && (pattern[p] == word[s] || pattern[p] == '?') {
            p += 1;
            s += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            p += 1;
            resume = s;
            skips = 0;
        } else if let Some(star_at) = star.filter(|_| skips < budget) {
            p = star_at + 1;
            resume += 1;
            s = resume;
            skips += 1;
        } else {
            return false;
        }
    }

    while p < pattern.len() && (pattern[p] == '*' || pattern[p] == '?') {
        p += 1;
    }
    p == pattern.len()
}

/// Split a query into lowercased words
pub fn query_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Resolve every query word to catalog ordinals in one pass over `words`.
///
/// Empty catalog lines belong to records with no known term and never match.
pub fn resolve_query(query: &str, words: &[String]) -> Vec<TermMatch> {
    let terms = query_terms(query);
    let patterns: Vec<(Vec<char>, usize)> = terms
        .iter()
        .map(|t| {
            let chars: Vec<char> = t.chars().collect();
            let budget = allowed_skip(&chars);
            (chars, budget)
        })
        .collect();
    let mut matches: Vec<TermMatch> = terms.into_iter().map(TermMatch::new).collect();

    let mut scratch: Vec<char> = Vec::new();
    for (ordinal, word) in words.iter().enumerate() {
        if word.is_empty() {
            continue;
        }
        scratch.clear();
        scratch.extend(word.chars());

        for ((pattern, budget), term_match) in patterns.iter().zip(matches.iter_mut()) {
            if match_chars(pattern, &scratch, *budget) {
                term_match.ordinals.push(ordinal as u64);
            }
        }
    }

    matches
}
