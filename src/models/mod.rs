//! Data models for kuzu-memory.
//!
//! This module contains all the core data structures used throughout the system.

mod learn;
mod memory;
mod recall;

pub use learn::{LearnOutcome, LearnRequest};
pub use memory::{EntityRef, Memory, MemoryId, MemoryType, RelationKind, SourceType};
pub use recall::{RecallFilters, RecallOptions, RecallResult, RecallStrategy, ScoredMemory};
