//! Classification rule patterns.
//!
//! Static pattern data for the rule-based classifier. Rules are ordered by
//! specificity: the first match wins, so narrow cues (preference phrasing,
//! past-tense decisions) sit above broad ones (identity statements).
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use crate::models::MemoryType;
use regex::Regex;
use std::sync::LazyLock;

/// A classification rule with its target type and scoring parameters.
#[derive(Debug)]
pub struct ClassificationRule {
    /// The regex cue to match against lower-cased content.
    pub pattern: Regex,
    /// The memory type this cue indicates.
    pub memory_type: MemoryType,
    /// Importance assigned before signal bonuses.
    pub base_importance: f64,
    /// Classifier certainty when this rule fires.
    pub confidence: f64,
    /// Human-readable description of the cue.
    #[allow(dead_code)]
    pub description: &'static str,
}

/// Confidence assigned when no rule fires and the default type applies.
pub const DEFAULT_CONFIDENCE: f64 = 0.4;

/// Importance assigned when no rule fires.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Ranked classification rules, most specific first.
pub static CLASSIFICATION_RULES: LazyLock<Vec<ClassificationRule>> = LazyLock::new(|| {
    vec![
        // Preference cues
        ClassificationRule {
            pattern: Regex::new(r"\b(i|we)\s+prefer\b").expect("static regex: I/we prefer"),
            memory_type: MemoryType::Preference,
            base_importance: 0.75,
            confidence: 0.85,
            description: "I/we prefer",
        },
        ClassificationRule {
            pattern: Regex::new(r"\bprefer\s+\S+.*\b(over|to|instead\s+of)\b")
                .expect("static regex: prefer X over Y"),
            memory_type: MemoryType::Preference,
            base_importance: 0.75,
            confidence: 0.85,
            description: "prefer X over Y",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b(team|we)\s+(uses|always\s+use|prefers)\b")
                .expect("static regex: team uses"),
            memory_type: MemoryType::Preference,
            base_importance: 0.7,
            confidence: 0.8,
            description: "team uses / we always use",
        },
        // Past-tense decision cues
        ClassificationRule {
            pattern: Regex::new(r"\b(we|i|team)\s+(decided|chose|agreed|opted)\b")
                .expect("static regex: we decided"),
            memory_type: MemoryType::Episodic,
            base_importance: 0.65,
            confidence: 0.85,
            description: "we decided/chose",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b(migrated|switched|upgraded|moved)\s+(to|from)\b")
                .expect("static regex: migrated to"),
            memory_type: MemoryType::Episodic,
            base_importance: 0.6,
            confidence: 0.8,
            description: "migrated/switched to",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b(yesterday|last\s+(week|month|sprint)|on\s+\d{4}-\d{2}-\d{2})\b")
                .expect("static regex: dated event"),
            memory_type: MemoryType::Episodic,
            base_importance: 0.55,
            confidence: 0.75,
            description: "dated event",
        },
        // Imperative/procedural cues
        ClassificationRule {
            pattern: Regex::new(r"^(always|never)\b").expect("static regex: leading always/never"),
            memory_type: MemoryType::Procedural,
            base_importance: 0.7,
            confidence: 0.85,
            description: "leading always/never",
        },
        ClassificationRule {
            pattern: Regex::new(r"\brun\s+\S+.*\bbefore\b").expect("static regex: run X before Y"),
            memory_type: MemoryType::Procedural,
            base_importance: 0.65,
            confidence: 0.8,
            description: "run X before Y",
        },
        ClassificationRule {
            pattern: Regex::new(r"\bstep\s+\d+\b").expect("static regex: step N"),
            memory_type: MemoryType::Procedural,
            base_importance: 0.65,
            confidence: 0.8,
            description: "step N",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b(make\s+sure\s+to|remember\s+to|in\s+order\s+to)\b")
                .expect("static regex: make sure to"),
            memory_type: MemoryType::Procedural,
            base_importance: 0.6,
            confidence: 0.75,
            description: "make sure to",
        },
        // First-person present-progressive cues
        ClassificationRule {
            pattern: Regex::new(r"\b(currently|right\s+now|at\s+the\s+moment)\b")
                .expect("static regex: currently"),
            memory_type: MemoryType::Working,
            base_importance: 0.45,
            confidence: 0.8,
            description: "currently / right now",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b(i|we)\s*('m|'re|am|are)\s+working\s+on\b")
                .expect("static regex: working on"),
            memory_type: MemoryType::Working,
            base_importance: 0.45,
            confidence: 0.8,
            description: "I am working on",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b(todo|in\s+progress|wip)\b").expect("static regex: in progress"),
            memory_type: MemoryType::Working,
            base_importance: 0.4,
            confidence: 0.7,
            description: "todo / in progress",
        },
        // Sensory cues
        ClassificationRule {
            pattern: Regex::new(r"\b(feels?|looks?|seems?|appears?|sounds?)\b")
                .expect("static regex: feels/looks/seems"),
            memory_type: MemoryType::Sensory,
            base_importance: 0.35,
            confidence: 0.7,
            description: "feels/looks/seems",
        },
        // Identity/fact cues
        ClassificationRule {
            pattern: Regex::new(r"\bthis\s+(project|repo|service|codebase)\s+uses\b")
                .expect("static regex: this project uses"),
            memory_type: MemoryType::Semantic,
            base_importance: 0.65,
            confidence: 0.8,
            description: "this project uses",
        },
        ClassificationRule {
            pattern: Regex::new(r"\b\S+\s+(is|are)\s+(a|an|the)\s+\S+")
                .expect("static regex: X is a Y"),
            memory_type: MemoryType::Semantic,
            base_importance: 0.6,
            confidence: 0.75,
            description: "X is a Y",
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_compile_and_are_ordered() {
        // Forcing the LazyLock validates every pattern.
        assert!(!CLASSIFICATION_RULES.is_empty());
        // Preference cues must outrank the broad identity cue.
        let first_pref = CLASSIFICATION_RULES
            .iter()
            .position(|r| r.memory_type == MemoryType::Preference);
        let first_semantic = CLASSIFICATION_RULES
            .iter()
            .position(|r| r.memory_type == MemoryType::Semantic);
        assert!(first_pref < first_semantic);
    }

    #[test]
    fn test_rule_scores_in_range() {
        for rule in CLASSIFICATION_RULES.iter() {
            assert!((0.0..=1.0).contains(&rule.base_importance));
            assert!((0.3..=1.0).contains(&rule.confidence));
        }
    }
}
