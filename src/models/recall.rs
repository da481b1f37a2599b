//! Recall option and result types.

use super::{Memory, MemoryType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candidate-generation strategy for recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallStrategy {
    /// Pick automatically from the query's shape.
    #[default]
    Auto,
    /// Weighted keyword overlap.
    Keyword,
    /// Entity mention lookup.
    Entity,
    /// Recency-decayed listing.
    Temporal,
}

impl RecallStrategy {
    /// Returns the strategy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Keyword => "keyword",
            Self::Entity => "entity",
            Self::Temporal => "temporal",
        }
    }

    /// Parses a strategy from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "keyword" => Some(Self::Keyword),
            "entity" => Some(Self::Entity),
            "temporal" => Some(Self::Temporal),
            _ => None,
        }
    }
}

impl fmt::Display for RecallStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scope filters applied to every recall strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecallFilters {
    /// Restrict to one user scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Restrict to one session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Restrict to one memory type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
}

impl RecallFilters {
    /// True when no filter is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.session_id.is_none() && self.memory_type.is_none()
    }
}

/// Options controlling a recall request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecallOptions {
    /// Maximum memories to return.
    pub max_memories: usize,
    /// Candidate-generation strategy.
    pub strategy: RecallStrategy,
    /// Scope filters.
    pub filters: RecallFilters,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            max_memories: 5,
            strategy: RecallStrategy::Auto,
            filters: RecallFilters::default(),
        }
    }
}

/// A memory with its final ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    /// The memory.
    pub memory: Memory,
    /// Strategy base score in `[0, 1]`.
    pub base_score: f64,
    /// Combined ranking score.
    pub final_score: f64,
}

/// Result of a recall request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    /// Selected memories, best first.
    pub memories: Vec<ScoredMemory>,
    /// Which strategy produced the result (`"partial"` on deadline).
    pub strategy_used: String,
    /// Mean of the selected final scores, clipped to `[0, 1]`.
    pub confidence: f64,
    /// Wall-clock time spent inside the engine.
    pub elapsed_ms: u64,
}

impl RecallResult {
    /// An empty result for queries with no candidates.
    #[must_use]
    pub fn empty(strategy: &str, elapsed_ms: u64) -> Self {
        Self {
            memories: Vec::new(),
            strategy_used: strategy.to_string(),
            confidence: 0.0,
            elapsed_ms,
        }
    }

    /// Ids of the selected memories in rank order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.memories.iter().map(|s| s.memory.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_roundtrip() {
        for s in ["auto", "keyword", "entity", "temporal"] {
            let parsed = RecallStrategy::parse(s);
            assert!(parsed.is_some());
            assert_eq!(parsed.map(|p| p.as_str()), Some(s));
        }
        assert_eq!(RecallStrategy::parse("semantic"), None);
    }

    #[test]
    fn test_default_options() {
        let opts = RecallOptions::default();
        assert_eq!(opts.max_memories, 5);
        assert_eq!(opts.strategy, RecallStrategy::Auto);
        assert!(opts.filters.is_empty());
    }
}
