//! Rule-based content classification.
//!
//! Maps raw observation text to a memory type with importance, confidence,
//! keywords, entities, and sentiment. Classification is pure and
//! deterministic: the same content always produces the same result, in
//! per-item and batch mode alike.

// Allow unused_self for methods kept for API consistency.
#![allow(clippy::unused_self)]

pub mod entities;
pub mod keywords;
mod rules;
mod sentiment;

pub use entities::{extract_entities, extract_entity_names};
pub use keywords::{DEFAULT_TOP_K, STOP_WORDS, extract_keywords, term_frequencies, tokenize};
pub use rules::{CLASSIFICATION_RULES, ClassificationRule};
pub use sentiment::polarity;

use crate::models::{EntityRef, MemoryType, SourceType};
use regex::Regex;
use std::sync::LazyLock;

/// Signals for the numeric-identifier/URL/path importance bonus.
#[allow(clippy::expect_used)] // static regex
static SPECIFICITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d|https?://|(?:[\w.-]+/[\w.-]+)").expect("static regex: specificity")
});

/// Result of classifying one observation.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Selected cognitive category.
    pub memory_type: MemoryType,
    /// Ranking and pruning weight in `[0, 1]`.
    pub importance: f64,
    /// Classifier certainty in `[0, 1]`, at least 0.3.
    pub confidence: f64,
    /// Extracted keyword tokens.
    pub keywords: Vec<String>,
    /// Extracted entities.
    pub entities: Vec<EntityRef>,
    /// Lexicon polarity in `[-1, 1]`.
    pub sentiment: f64,
}

/// Optional context steering a classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyHints {
    /// Where the content came from.
    pub source: Option<SourceType>,
    /// Force a specific memory type (the git importer pins `Episodic`).
    pub memory_type: Option<MemoryType>,
}

/// Rule-based classifier.
///
/// Stateless; all pattern tables are static, so construction is free and the
/// same instance may be shared across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    /// Creates a classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classifies one observation.
    ///
    /// Applies the ranked rule table to the lower-cased, whitespace-collapsed
    /// content; the first matching rule decides the type. Without a match the
    /// content defaults to semantic with low confidence.
    #[must_use]
    pub fn classify(&self, content: &str, hints: ClassifyHints) -> Classification {
        let normalised = normalise(content);
        let entities = extract_entities(content);
        let entity_names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let keywords = extract_keywords(content, &entity_names, DEFAULT_TOP_K);
        let sentiment = polarity(content);

        let (memory_type, base_importance, confidence) = hints.memory_type.map_or_else(
            || {
                CLASSIFICATION_RULES
                    .iter()
                    .find(|rule| rule.pattern.is_match(&normalised))
                    .map_or(
                        (
                            MemoryType::Semantic,
                            rules::DEFAULT_IMPORTANCE,
                            rules::DEFAULT_CONFIDENCE,
                        ),
                        |rule| (rule.memory_type, rule.base_importance, rule.confidence),
                    )
            },
            |forced| (forced, rules::DEFAULT_IMPORTANCE, 0.95),
        );

        let importance = importance_with_signals(base_importance, content, sentiment);

        metrics::counter!(
            "classification_total",
            "memory_type" => memory_type.as_str(),
            "source" => hints.source.unwrap_or_default().as_str()
        )
        .increment(1);

        Classification {
            memory_type,
            importance,
            confidence,
            keywords,
            entities,
            sentiment,
        }
    }

    /// Classifies a batch, preserving input order.
    ///
    /// Batch mode shares the static pattern tables but must not change any
    /// output relative to per-item classification.
    #[must_use]
    pub fn classify_batch(&self, items: &[(&str, ClassifyHints)]) -> Vec<Classification> {
        items
            .iter()
            .map(|(content, hints)| self.classify(content, *hints))
            .collect()
    }
}

/// Lower-cases and collapses whitespace, mirroring hash normalisation.
#[must_use]
pub fn normalise(content: &str) -> String {
    content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Applies the importance signal bonuses and clips to `[0, 1]`.
fn importance_with_signals(base: f64, content: &str, sentiment: f64) -> f64 {
    let mut importance = base;
    let len = content.trim().chars().count();
    if (50..=300).contains(&len) {
        importance += 0.1;
    }
    if SPECIFICITY_PATTERN.is_match(content) {
        importance += 0.05;
    }
    if sentiment.abs() > 0.6 {
        importance += 0.15;
    }
    importance.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn classify(content: &str) -> Classification {
        Classifier::new().classify(content, ClassifyHints::default())
    }

    #[test_case("I prefer pytest over unittest", MemoryType::Preference; "explicit preference")]
    #[test_case("Team uses PostgreSQL 14", MemoryType::Preference; "team convention")]
    #[test_case("We decided to drop the legacy importer", MemoryType::Episodic; "past decision")]
    #[test_case("migrated to tokio 1.50 from async-std", MemoryType::Episodic; "migration")]
    #[test_case("Always run cargo fmt before committing", MemoryType::Procedural; "leading always")]
    #[test_case("step 3: restart the worker pool", MemoryType::Procedural; "numbered step")]
    #[test_case("currently tweaking FastAPI router", MemoryType::Working; "current task")]
    #[test_case("the dashboard feels slow after deploys", MemoryType::Sensory; "sensory cue")]
    #[test_case("this project uses a single shared database handle", MemoryType::Semantic; "identity")]
    fn test_rule_selection(content: &str, expected: MemoryType) {
        assert_eq!(classify(content).memory_type, expected);
    }

    #[test]
    fn test_default_is_semantic_low_confidence() {
        let c = classify("zebra umbrella cadence");
        assert_eq!(c.memory_type, MemoryType::Semantic);
        assert!((c.confidence - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_totality_confidence_floor() {
        for content in [
            "x",
            "I prefer tabs",
            "?!",
            "a very long sentence about nothing in particular that still must classify",
        ] {
            let c = classify(content);
            assert!(c.confidence >= 0.3, "confidence too low for {content:?}");
            assert!((0.0..=1.0).contains(&c.importance));
        }
    }

    #[test]
    fn test_preference_importance_floor() {
        let c = classify("I prefer pytest over unittest");
        assert!(c.importance >= 0.7);
        assert!(c.keywords.contains(&"pytest".to_string()));
        assert!(c.keywords.contains(&"unittest".to_string()));
    }

    #[test]
    fn test_working_importance_stays_low() {
        let c = classify("currently tweaking FastAPI router");
        assert!(c.importance <= 0.5);
    }

    #[test]
    fn test_length_and_specificity_bonuses() {
        let short = classify("zebra umbrella cadence");
        let detailed =
            classify("zebra umbrella cadence is configured in src/config/mod.rs near line 42");
        assert!(detailed.importance > short.importance);
    }

    #[test]
    fn test_forced_type_hint() {
        let c = Classifier::new().classify(
            "feat: add retry backoff | Files: src/storage/database.rs",
            ClassifyHints {
                source: Some(SourceType::GitSync),
                memory_type: Some(MemoryType::Episodic),
            },
        );
        assert_eq!(c.memory_type, MemoryType::Episodic);
        assert!(c.confidence >= 0.9);
    }

    #[test]
    fn test_batch_matches_per_item() {
        let classifier = Classifier::new();
        let inputs = [
            "I prefer pytest over unittest",
            "currently tweaking FastAPI router",
            "the dashboard feels slow after deploys",
        ];
        let batch: Vec<(&str, ClassifyHints)> = inputs
            .iter()
            .map(|c| (*c, ClassifyHints::default()))
            .collect();
        let batch_results = classifier.classify_batch(&batch);
        for (content, from_batch) in inputs.iter().zip(&batch_results) {
            let single = classifier.classify(content, ClassifyHints::default());
            assert_eq!(single.memory_type, from_batch.memory_type);
            assert!((single.importance - from_batch.importance).abs() < f64::EPSILON);
            assert_eq!(single.keywords, from_batch.keywords);
        }
    }

    #[test]
    fn test_deterministic() {
        let a = classify("We decided to cache recall results for 60 seconds");
        let b = classify("We decided to cache recall results for 60 seconds");
        assert_eq!(a.memory_type, b.memory_type);
        assert!((a.importance - b.importance).abs() < f64::EPSILON);
        assert_eq!(a.keywords, b.keywords);
    }
}
