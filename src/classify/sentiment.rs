//! Lexicon-based sentiment polarity.
//!
//! A small fixed lexicon scores content in `[-1, 1]`. Neutral (0.0) by
//! default; only the importance bonus consumes the value, so the lexicon
//! favours precision over coverage.

use super::keywords::tokenize;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Positive polarity tokens.
static POSITIVE_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "good", "great", "excellent", "fast", "faster", "clean", "love", "loves", "solid",
        "reliable", "stable", "simple", "elegant", "perfect", "works", "fixed", "improved",
        "better", "best", "happy", "nice", "robust", "efficient",
    ]
    .into_iter()
    .collect()
});

/// Negative polarity tokens.
static NEGATIVE_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "bad", "terrible", "awful", "slow", "slower", "broken", "hate", "hates", "flaky",
        "unreliable", "unstable", "messy", "buggy", "crash", "crashes", "fails", "failed",
        "worse", "worst", "painful", "confusing", "fragile", "leaky", "wrong",
    ]
    .into_iter()
    .collect()
});

/// Intensifiers that push polarity toward the extremes.
static INTENSIFIERS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ["very", "extremely", "really", "incredibly", "absolutely", "totally"]
        .into_iter()
        .collect()
});

/// Computes lexicon polarity in `[-1, 1]`.
///
/// Polarity is the signed share of matched sentiment tokens, scaled up by
/// 0.25 per intensifier and clipped. Content with no sentiment tokens is
/// neutral.
#[must_use]
pub fn polarity(content: &str) -> f64 {
    let tokens = tokenize(content);
    let mut positive = 0_i32;
    let mut negative = 0_i32;
    let mut intensifiers = 0_u32;

    for token in &tokens {
        let t = token.as_str();
        if POSITIVE_WORDS.contains(t) {
            positive += 1;
        } else if NEGATIVE_WORDS.contains(t) {
            negative += 1;
        } else if INTENSIFIERS.contains(t) {
            intensifiers += 1;
        }
    }

    let matched = positive + negative;
    if matched == 0 {
        return 0.0;
    }

    let base = f64::from(positive - negative) / f64::from(matched);
    let boost = 1.0 + 0.25 * f64::from(intensifiers);
    (base * boost).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_by_default() {
        assert!((polarity("the build uses cargo workspaces")).abs() < f64::EPSILON);
    }

    #[test]
    fn test_positive_and_negative() {
        assert!(polarity("the new cache is fast and reliable") > 0.6);
        assert!(polarity("the old importer is slow and flaky") < -0.6);
    }

    #[test]
    fn test_mixed_content_dampens() {
        let p = polarity("fast but also buggy");
        assert!(p.abs() < 0.5);
    }

    #[test]
    fn test_intensifier_pushes_extreme() {
        let plain = polarity("deploys feel slow sometimes and ok");
        let intense = polarity("deploys feel extremely slow");
        assert!(intense <= plain);
        assert!((-1.0..=1.0).contains(&intense));
    }
}
