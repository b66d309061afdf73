//! Keyword-overlap scoring over document metadata.
//!
//! Complements the semantic score in hybrid retrieval. Uses BM25-style term
//! frequency saturation so a term repeated ten times in the metadata does
//! not dominate a term matched once.

use std::collections::HashMap;

/// Term-frequency saturation constant.
const K1: f32 = 1.2;

/// Lowercased alphanumeric tokens, minimum two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Overlap score of a query against a metadata text, in `[0, 1)`.
///
/// Each query token contributes `tf / (tf + K1)` where `tf` is its count in
/// the metadata; the sum is averaged over the query tokens.
pub fn overlap_score(query: &str, metadata_text: &str) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }

    let mut term_counts: HashMap<String, u32> = HashMap::new();
    for token in tokenize(metadata_text) {
        *term_counts.entry(token).or_insert(0) += 1;
    }

    let total: f32 = query_tokens
        .iter()
        .map(|token| {
            let tf = term_counts.get(token).copied().unwrap_or(0) as f32;
            tf / (tf + K1)
        })
        .sum();

    total / query_tokens.len() as f32
}
