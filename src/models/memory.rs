//! Memory types and identifiers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Cognitive memory categories with fixed retention policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Facts and specifications. Retained forever.
    #[default]
    Semantic,
    /// Processes and how-tos. Retained forever.
    Procedural,
    /// User and team preferences. Retained forever.
    Preference,
    /// Dated decisions and events. Retained for 30 days.
    Episodic,
    /// Current tasks. Retained for 1 day.
    Working,
    /// Transient observations. Retained for 6 hours.
    Sensory,
}

impl MemoryType {
    /// Returns all memory type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Semantic,
            Self::Procedural,
            Self::Preference,
            Self::Episodic,
            Self::Working,
            Self::Sensory,
        ]
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Preference => "preference",
            Self::Episodic => "episodic",
            Self::Working => "working",
            Self::Sensory => "sensory",
        }
    }

    /// Parses a memory type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            "preference" => Some(Self::Preference),
            "episodic" => Some(Self::Episodic),
            "working" => Some(Self::Working),
            "sensory" => Some(Self::Sensory),
            _ => None,
        }
    }

    /// Retention period for this type, or `None` for eternal memories.
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        match self {
            Self::Semantic | Self::Procedural | Self::Preference => None,
            Self::Episodic => Some(Duration::days(30)),
            Self::Working => Some(Duration::days(1)),
            Self::Sensory => Some(Duration::hours(6)),
        }
    }

    /// Ranking weight applied during recall selection.
    #[must_use]
    pub const fn type_weight(&self) -> f64 {
        match self {
            Self::Semantic | Self::Procedural => 1.0,
            Self::Preference => 0.95,
            Self::Episodic => 0.7,
            Self::Working => 0.6,
            Self::Sensory => 0.4,
        }
    }

    /// Decay constant (seconds) used by the temporal recall strategy.
    ///
    /// Short-lived types decay within an hour; everything else within a day.
    #[must_use]
    pub const fn recency_tau_seconds(&self) -> f64 {
        match self {
            Self::Working | Self::Sensory => 3_600.0,
            _ => 86_400.0,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Origin tag for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Captured from an assistant conversation.
    Conversation,
    /// Imported from git commit history.
    GitSync,
    /// Captured by a host-agent hook.
    Hook,
    /// Entered through the command line.
    Cli,
    /// Submitted through the JSON-RPC tool surface.
    #[default]
    Api,
}

impl SourceType {
    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::GitSync => "git_sync",
            Self::Hook => "hook",
            Self::Cli => "cli",
            Self::Api => "api",
        }
    }

    /// Parses a source type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conversation" => Some(Self::Conversation),
            "git_sync" | "git-sync" => Some(Self::GitSync),
            "hook" => Some(Self::Hook),
            "cli" => Some(Self::Cli),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind tag on a `RELATES_TO` edge between two memories.
///
/// `Consolidates` is reserved for a future merge job; the schema accepts it
/// so adding that job needs no migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelationKind {
    /// The source memory summarises the targets.
    Consolidates,
    /// The source memory replaces the target.
    Supersedes,
    /// The source memory refers to the target.
    References,
}

impl RelationKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Consolidates => "CONSOLIDATES",
            Self::Supersedes => "SUPERSEDES",
            Self::References => "REFERENCES",
        }
    }

    /// Parses a relation kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CONSOLIDATES" => Some(Self::Consolidates),
            "SUPERSEDES" => Some(Self::Supersedes),
            "REFERENCES" => Some(Self::References),
            _ => None,
        }
    }
}

/// A named entity mentioned by a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity name as extracted.
    pub name: String,
    /// Lowercased, whitespace-collapsed form used for joins.
    pub normalized_name: String,
    /// Coarse kind: `name`, `quoted`, `url`, `path`, or `version`.
    pub kind: String,
}

impl EntityRef {
    /// Creates an entity reference, deriving the normalised name.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        let normalized_name = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Self {
            name,
            normalized_name,
            kind: kind.into(),
        }
    }
}

/// A persisted observation with retention policy.
///
/// Memories are immutable records owned by the store; the recall engine and
/// enhancer only ever see shared read-only references or clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier.
    pub id: MemoryId,
    /// The memory content, trimmed, 1..4096 chars.
    pub content: String,
    /// Hex SHA-256 of the lower-cased, whitespace-collapsed content.
    pub content_hash: String,
    /// Cognitive category.
    pub memory_type: MemoryType,
    /// Origin tag.
    pub source_type: SourceType,
    /// Optional session scope.
    pub session_id: Option<String>,
    /// Optional agent scope.
    pub agent_id: Option<String>,
    /// Optional user scope.
    pub user_id: Option<String>,
    /// Ranking and pruning weight in `[0, 1]`.
    pub importance: f64,
    /// Classifier certainty in `[0, 1]`.
    pub confidence: f64,
    /// Times this memory has been returned by recall.
    pub access_count: u64,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last access instant. Never earlier than `created_at`.
    pub accessed_at: DateTime<Utc>,
    /// Start of validity.
    pub valid_from: DateTime<Utc>,
    /// End of validity; `None` means eternal.
    pub valid_to: Option<DateTime<Utc>>,
    /// Free-form metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Normalised keyword tokens extracted at ingest.
    pub keywords: Vec<String>,
    /// Extracted entity names.
    pub entities: Vec<String>,
}

impl Memory {
    /// Builds a new memory, deriving `content_hash`, timestamps, and
    /// `valid_to` from the type's retention policy.
    #[must_use]
    pub fn new(content: impl Into<String>, memory_type: MemoryType, created_at: DateTime<Utc>) -> Self {
        let content = content.into();
        let content_hash = crate::dedup::ContentHasher::hash(&content);
        let valid_to = memory_type.retention().map(|d| created_at + d);
        Self {
            id: MemoryId::generate(),
            content,
            content_hash,
            memory_type,
            source_type: SourceType::default(),
            session_id: None,
            agent_id: None,
            user_id: None,
            importance: 0.5,
            confidence: 0.5,
            access_count: 0,
            created_at,
            accessed_at: created_at,
            valid_from: created_at,
            valid_to,
            metadata: HashMap::new(),
            keywords: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// True when the memory has not expired at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.valid_to.is_none_or(|until| until > now)
    }

    /// Age of the memory at `now`, clamped to zero for clock skew.
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_milliseconds() as f64 / 1_000.0;
        secs.max(0.0)
    }
}
