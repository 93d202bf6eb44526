//! Shared text utilities
//!
//! Normalization and tokenization used by alias discovery, retrieval and
//! the quality analyzer. Kept here so every component normalizes terms the
//! same way.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// English stop words stripped during term normalization
pub static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "has",
        "have", "how", "if", "in", "is", "it", "its", "of", "on", "or", "our", "that", "the",
        "their", "then", "there", "these", "they", "this", "to", "was", "we", "were", "what",
        "when", "where", "which", "who", "whom", "why", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, collapse whitespace, strip punctuation fringes
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized words with stop words removed
pub fn content_words(text: &str) -> Vec<String> {
    normalize_term(text)
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(*w))
        .map(|w| w.to_string())
        .collect()
}

/// Whether the whole phrase is stop words (or empty) after normalization
pub fn is_stop_word_phrase(phrase: &str) -> bool {
    normalize_term(phrase)
        .split_whitespace()
        .all(|w| STOP_WORDS.contains(w))
}

/// Acronyms are letters only, 2-6 chars
pub fn is_acronym(term: &str) -> bool {
    let t = term.trim();
    (2..=6).contains(&t.chars().count()) && t.chars().all(|c| c.is_ascii_alphabetic())
}

/// Token count in whitespace terms
pub fn token_len(term: &str) -> usize {
    term.split_whitespace().count()
}

/// Rough LLM-token estimate: ~4 characters per token for English prose
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

/// Candidate noun phrases from a query: each content word, adjacent
/// pairs, and whole contiguous runs of content words.
pub fn noun_phrases(query: &str) -> Vec<String> {
    fn push(phrase: String, phrases: &mut Vec<String>) {
        if !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }

    fn flush(run: &mut Vec<&str>, phrases: &mut Vec<String>) {
        for pair in run.windows(2) {
            push(pair.join(" "), phrases);
        }
        if run.len() > 2 {
            push(run.join(" "), phrases);
        }
        run.clear();
    }

    let normalized = normalize_term(query);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let mut phrases: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    for word in &words {
        if STOP_WORDS.contains(word) {
            flush(&mut run, &mut phrases);
        } else {
            run.push(word);
            push(word.to_string(), &mut phrases);
        }
    }
    flush(&mut run, &mut phrases);
    phrases
}

/// Word shingles for near-duplicate detection
pub fn shingles(text: &str, width: usize) -> HashSet<String> {
    let words: Vec<String> = normalize_term(text)
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    if words.len() < width {
        let mut set = HashSet::new();
        if !words.is_empty() {
            set.insert(words.join(" "));
        }
        return set;
    }
    words.windows(width).map(|w| w.join(" ")).collect()
}

/// Jaccard similarity over shingle sets
pub fn shingled_jaccard(a: &str, b: &str, width: usize) -> f32 {
    let sa = shingles(a, width);
    let sb = shingles(b, width);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count() as f32;
    let union = (sa.len() + sb.len()) as f32 - intersection;
    intersection / union
}
