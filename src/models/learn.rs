//! Learn request and outcome types.

use super::{MemoryId, MemoryType, SourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request to ingest one observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnRequest {
    /// The raw observation text.
    pub content: String,
    /// Origin tag.
    #[serde(default)]
    pub source: SourceType,
    /// Optional session scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Optional agent scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Optional user scope; resolved from config/git identity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form metadata to attach.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Pin the memory type instead of classifying (the git importer pins
    /// episodic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    /// Creation-time override; the git importer backdates commits with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl LearnRequest {
    /// Convenience constructor for plain content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Result of running the learn pipeline on one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LearnOutcome {
    /// A new memory row was created.
    Stored {
        /// Id of the new memory.
        memory_id: MemoryId,
    },
    /// An equivalent live memory already existed and was bumped.
    Updated {
        /// Id of the existing memory.
        memory_id: MemoryId,
    },
    /// Content matched a secrets deny-list pattern and was not stored.
    SkippedSecret {
        /// Name of the pattern that matched.
        pattern: String,
    },
    /// Content was shorter than the configured ingest minimum.
    SkippedTooShort {
        /// Observed content length.
        length: usize,
        /// Configured minimum.
        min: usize,
    },
}

impl LearnOutcome {
    /// Id of the stored or updated memory, when one exists.
    #[must_use]
    pub const fn memory_id(&self) -> Option<&MemoryId> {
        match self {
            Self::Stored { memory_id } | Self::Updated { memory_id } => Some(memory_id),
            _ => None,
        }
    }

    /// True when the pipeline skipped the content instead of persisting it.
    #[must_use]
    pub const fn skipped(&self) -> bool {
        matches!(self, Self::SkippedSecret { .. } | Self::SkippedTooShort { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_memory_id() {
        let id = MemoryId::new("m1");
        assert_eq!(
            LearnOutcome::Stored { memory_id: id.clone() }.memory_id(),
            Some(&id)
        );
        assert_eq!(
            LearnOutcome::SkippedSecret { pattern: "api_key".to_string() }.memory_id(),
            None
        );
    }

    #[test]
    fn test_outcome_skipped() {
        assert!(LearnOutcome::SkippedTooShort { length: 2, min: 5 }.skipped());
        assert!(!LearnOutcome::Updated { memory_id: MemoryId::new("m") }.skipped());
    }
}
