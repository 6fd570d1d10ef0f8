//! Analyzer for text fields
//!
//! Index time and query time share [`tokenize`], so a text query matches
//! exactly the terms its words produce when indexed. Terms are UAX#29 words,
//! lowercased, with English possessives and punctuation removed. Single
//! characters and common English stopwords are dropped. There is no
//! stemming: `runs` and `run` are different terms.

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Terms shorter than this are not indexed.
const MIN_TERM_CHARS: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

fn normalize(word: &str) -> Option<String> {
    let word = ["'s", "\u{2019}s"]
        .iter()
        .find_map(|suffix| word.strip_suffix(suffix))
        .unwrap_or(word);
    let term: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    let keep = term.chars().count() >= MIN_TERM_CHARS && !STOPWORDS.contains(&term.as_str());
    keep.then_some(term)
}

/// Terms of `text` in order, repeats included.
///
/// ```
/// use vellum_storage::tokenizer::tokenize;
///
/// assert_eq!(tokenize("The Quick Brown Fox's den"), vec!["quick", "brown", "fox", "den"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().filter_map(normalize).collect()
}

/// Distinct terms of `text` in first-seen order.
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.unicode_words()
        .filter_map(normalize)
        .filter(|term| seen.insert(term.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_and_case_are_ignored() {
        assert_eq!(tokenize("Hello, WORLD!"), vec!["hello", "world"]);
        assert!(tokenize("...---...").is_empty());
    }

    #[test]
    fn test_short_terms_and_stopwords_are_dropped() {
        assert_eq!(tokenize("I am a test of it"), vec!["am", "test"]);
    }

    #[test]
    fn test_alphanumeric_terms_survive() {
        assert_eq!(tokenize("order-66 v2 x"), vec!["order", "66", "v2"]);
    }

    #[test]
    fn test_possessives_are_stripped() {
        assert_eq!(tokenize("Ada's notes"), vec!["ada", "notes"]);
        assert_eq!(tokenize("Ada\u{2019}s notes"), vec!["ada", "notes"]);
    }

    #[test]
    fn test_unique_keeps_first_occurrence_order() {
        assert_eq!(tokenize_unique("data Data base DATA"), vec!["data", "base"]);
    }
}
