//! # kuzu-memory
//!
//! Project-scoped cognitive memory for AI coding assistants.
//!
//! kuzu-memory ingests short textual observations, classifies each one into a
//! cognitive memory category with a retention policy, persists it in an
//! embedded property-graph store, and serves two latency-sensitive retrieval
//! operations: **recall** (top-K relevant memories for a query) and
//! **enhance** (rewrite a prompt by prepending recalled context).
//!
//! ## Features
//!
//! - Six memory categories with fixed retention (semantic, procedural,
//!   preference, episodic, working, sensory)
//! - Rule-based classification, deduplication by content hash and keyword
//!   similarity, secrets filtering
//! - Multi-strategy recall (keyword, entity, temporal) with TTL'd LRU caches
//! - Asynchronous learning queue so interactive hooks never block on writes
//! - Line-delimited JSON-RPC server over stdio exposing a fixed tool surface
//! - Git-history importer that turns significant commits into memories
//!
//! ## Example
//!
//! ```rust,ignore
//! use kuzu_memory::{LearnRequest, Learner, MemoryConfig};
//!
//! let learner = Learner::open(&config)?;
//! let outcome = learner.learn(LearnRequest {
//!     content: "Team uses PostgreSQL 14".to_string(),
//!     ..Default::default()
//! })?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

// Module declarations
pub mod classify;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod git;
pub mod learner;
pub mod mcp;
pub mod models;
pub mod observability;
pub mod queue;
pub mod recall;
pub mod storage;

// Re-exports for convenience
pub use classify::{Classification, Classifier};
pub use config::{MemoryConfig, ProjectPaths};
pub use dedup::{ContentHasher, Deduplicator, SecretFilter};
pub use learner::Learner;
pub use models::{
    LearnOutcome, LearnRequest, Memory, MemoryId, MemoryType, RecallFilters, RecallOptions,
    RecallResult, RecallStrategy, ScoredMemory, SourceType,
};
pub use queue::{LearnQueue, TaskStatus};
pub use recall::{Enhancer, RecallEngine};
pub use storage::{MemoryStore, StoreStats};

/// Error type for kuzu-memory operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotInitialised` | The `kuzu-memory/` project directory does not exist |
/// | `Invalid` | Input violates validation (empty content, bad enum value) |
/// | `Config` | `config.yaml` cannot be read or parsed |
/// | `BusyTimeout` | The write retry budget is exhausted under contention |
/// | `QueueFull` | The learn queue is saturated or its breaker is open |
/// | `SecretRejected` | Content matched a deny-list pattern |
/// | `DeadlineExceeded` | A hard deadline elapsed before the operation finished |
/// | `Corrupt` | The storage engine reports unrecoverable state |
/// | `OperationFailed` | I/O, git, or database operations fail |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The project memory directory has not been created yet.
    ///
    /// Raised when any operation other than `init` runs against a project
    /// without a `kuzu-memory/` (or `.kuzu-memory/`) directory.
    #[error("project not initialised: {0} (run `kuzu-memory init`)")]
    NotInitialised(PathBuf),

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Content is empty or exceeds the 4096-char limit
    /// - An enum string (memory type, strategy, source) does not parse
    /// - JSON arguments fail validation at the RPC boundary
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The write retry budget was exhausted under contention.
    #[error("operation '{operation}' timed out after {attempts} write attempts")]
    BusyTimeout {
        /// The operation that could not acquire the writer slot.
        operation: String,
        /// How many attempts were made before giving up.
        attempts: u32,
    },

    /// The learn queue rejected a task.
    ///
    /// Raised when the bounded queue is at capacity or the circuit breaker
    /// is open after consecutive worker failures.
    #[error("learn queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Content matched a secrets deny-list pattern and was rejected
    /// before hashing or storage.
    #[error("content rejected: matched secret pattern '{pattern}'")]
    SecretRejected {
        /// Name of the pattern that matched.
        pattern: String,
    },

    /// A hard deadline elapsed before the operation finished.
    ///
    /// Recall never raises this (it degrades to a partial result); `learn`
    /// raises it when a synchronous wait expires while the task is still
    /// queued.
    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded {
        /// Milliseconds elapsed when the deadline fired.
        elapsed_ms: u64,
    },

    /// A non-upsert `put` collided with an equivalent live memory.
    ///
    /// The learn pipeline never surfaces this (deduplication bumps the
    /// existing row instead); direct store callers see it.
    #[error("duplicate content: existing memory {existing}")]
    Conflict {
        /// Id of the live memory with the same `(content_hash, user_id)`.
        existing: models::MemoryId,
    },

    /// The storage engine reported unrecoverable state.
    ///
    /// Fatal: callers should surface this and exit rather than retry.
    #[error("storage corrupt: {0}")]
    Corrupt(String),

    /// An operation failed.
    ///
    /// The catch-all for I/O errors, git failures, and database errors that
    /// do not fit a more specific variant.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Maps the error to the process exit code contract.
    ///
    /// `0` success, `1` generic error, `2` invalid arguments, `3` not
    /// initialised, `4` busy timeout, `5` configuration error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Invalid(_) => 2,
            Self::NotInitialised(_) => 3,
            Self::BusyTimeout { .. } => 4,
            Self::Config(_) => 5,
            _ => 1,
        }
    }

    /// Returns a short machine-readable kind tag for tool result payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialised(_) => "not_initialised",
            Self::Invalid(_) => "invalid",
            Self::Config(_) => "config",
            Self::BusyTimeout { .. } => "busy",
            Self::QueueFull { .. } => "queue_full",
            Self::SecretRejected { .. } => "secret_rejected",
            Self::DeadlineExceeded { .. } => "deadline",
            Self::Conflict { .. } => "conflict",
            Self::Corrupt(_) => "corrupt",
            Self::OperationFailed { .. } => "internal",
        }
    }

    /// Returns true for engine errors worth retrying under backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::BusyTimeout { .. })
    }
}

/// Result type alias for kuzu-memory operations.
pub type Result<T> = std::result::Result<T, Error>;
