//! Keyword extraction.
//!
//! Tokenises content, drops stop words and extracted entities, applies a
//! light suffix stemmer, and keeps the top-K tokens by term frequency.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Default number of keywords kept per memory.
pub const DEFAULT_TOP_K: usize = 16;

/// Common stop words filtered from keyword extraction.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
        "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my",
        "your", "his", "its", "our", "their", "this", "that", "these", "those", "what", "which",
        "who", "whom", "how", "when", "where", "why", "all", "each", "every", "both", "few",
        "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so",
        "than", "too", "very", "just", "about", "also", "now", "here", "there", "up", "down",
        "out", "if", "then", "into", "through", "during", "before", "after", "above", "below",
        "between", "under", "again", "once", "any", "over", "am",
    ]
    .into_iter()
    .collect()
});

/// Splits content into lower-cased tokens.
///
/// Interior `.`, `/`, `-`, and `_` are preserved so versions, paths, and
/// compound identifiers survive as single tokens; surrounding punctuation is
/// trimmed.
#[must_use]
pub fn tokenize(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| !c.is_alphanumeric() && !matches!(c, '/' | '_'))
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Applies a light suffix stemmer.
///
/// Deterministic and intentionally crude: `-ies` → `-y`, then `-ing`, `-ed`,
/// and plural `-s` are stripped when the stem stays long enough.
#[must_use]
pub fn stem(token: &str) -> String {
    let t = token;
    if let Some(base) = t.strip_suffix("ies") {
        if base.len() >= 2 {
            return format!("{base}y");
        }
    }
    if let Some(base) = t.strip_suffix("ing") {
        if base.len() >= 3 {
            return base.to_string();
        }
    }
    if let Some(base) = t.strip_suffix("ed") {
        if base.len() >= 3 {
            return base.to_string();
        }
    }
    if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") && !t.ends_with("us") && !t.ends_with("is")
    {
        return t[..t.len() - 1].to_string();
    }
    t.to_string()
}

/// Extracts up to `top_k` keywords from content.
///
/// Entities already extracted from the same content are excluded (their
/// normalised single-token forms as well). Ties in term frequency resolve
/// alphabetically so extraction is deterministic.
#[must_use]
pub fn extract_keywords(content: &str, entities: &[String], top_k: usize) -> Vec<String> {
    let entity_tokens: HashSet<String> = entities
        .iter()
        .flat_map(|e| tokenize(e))
        .map(|t| stem(&t))
        .collect();

    let mut freq: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for token in tokenize(content) {
        if STOP_WORDS.contains(token.as_str()) {
            continue;
        }
        let stemmed = stem(&token);
        if stemmed.len() < 2 || entity_tokens.contains(&stemmed) {
            continue;
        }
        if !freq.contains_key(&stemmed) {
            order.push(stemmed.clone());
        }
        *freq.entry(stemmed).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = order
        .into_iter()
        .map(|t| {
            let count = freq.get(&t).copied().unwrap_or(0);
            (t, count)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_k);
    ranked.into_iter().map(|(t, _)| t).collect()
}

/// Term frequencies of the non-stop-word tokens in a query.
///
/// Used by the keyword strategy's weighted Jaccard scoring.
#[must_use]
pub fn term_frequencies(content: &str) -> HashMap<String, usize> {
    let mut freq = HashMap::new();
    for token in tokenize(content) {
        if STOP_WORDS.contains(token.as_str()) {
            continue;
        }
        let stemmed = stem(&token);
        if stemmed.len() < 2 {
            continue;
        }
        *freq.entry(stemmed).or_insert(0) += 1;
    }
    freq
}
