//! Deduplication: content hashing and near-duplicate detection.
//!
//! Two-tier check, short-circuiting on the first hit:
//! 1. **Exact**: SHA-256 over normalised content, same user scope.
//! 2. **Near**: Jaccard similarity on keyword sets above a configurable
//!    threshold, same memory type and user scope.
//!
//! The secrets deny-list runs before either tier so rejected content is
//! never hashed or queried.

mod secrets;

pub use secrets::{SecretFilter, SecretMatch};

use crate::models::{MemoryId, MemoryType, RecallFilters};
use crate::storage::MemoryStore;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Default Jaccard similarity threshold for near-duplicate detection.
pub const DEFAULT_NEAR_THRESHOLD: f64 = 0.85;

/// Content hasher for deduplication.
///
/// Normalises content (trim, lowercase, collapse whitespace) before hashing
/// so equivalent observations collide regardless of formatting.
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the SHA-256 hash of normalised content.
    ///
    /// Returns the lowercase hex digest (64 characters).
    #[must_use]
    pub fn hash(content: &str) -> String {
        let normalised = Self::normalize(content);
        let mut hasher = Sha256::new();
        hasher.update(normalised.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Normalises content for consistent hashing.
    ///
    /// 1. Trim leading/trailing whitespace
    /// 2. Convert to lowercase
    /// 3. Collapse internal whitespace runs to single spaces
    #[must_use]
    pub fn normalize(content: &str) -> String {
        content
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Plain Jaccard similarity of two keyword sets.
///
/// Empty-vs-empty is 0.0 so keyword-free content never near-matches.
#[must_use]
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&str> = a.iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    intersection as f64 / union as f64
}

/// Why a candidate was considered a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// Same content hash and user scope.
    Exact,
    /// Keyword Jaccard above threshold with same type and user scope.
    Near,
}

/// A duplicate hit against the store.
#[derive(Debug, Clone)]
pub struct DuplicateHit {
    /// Id of the existing live memory.
    pub memory_id: MemoryId,
    /// Which tier matched.
    pub kind: DuplicateKind,
    /// Similarity of the match (1.0 for exact).
    pub similarity: f64,
}

/// Duplicate checker operating against the store.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    /// Jaccard threshold for the near tier.
    near_threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            near_threshold: DEFAULT_NEAR_THRESHOLD,
        }
    }
}

impl Deduplicator {
    /// Creates a deduplicator with a custom near-duplicate threshold.
    #[must_use]
    pub fn new(near_threshold: f64) -> Self {
        Self {
            near_threshold: near_threshold.clamp(0.0, 1.0),
        }
    }

    /// Looks for an existing live duplicate of the given content.
    ///
    /// # Errors
    ///
    /// Propagates store query failures.
    pub fn find_duplicate(
        &self,
        store: &MemoryStore,
        content_hash: &str,
        keywords: &[String],
        memory_type: MemoryType,
        user_id: Option<&str>,
    ) -> Result<Option<DuplicateHit>> {
        // Tier 1: exact content hash within the user scope.
        if let Some(existing) = store.find_live_by_hash(content_hash, user_id)? {
            metrics::counter!("dedup_hits_total", "kind" => "exact").increment(1);
            return Ok(Some(DuplicateHit {
                memory_id: existing,
                kind: DuplicateKind::Exact,
                similarity: 1.0,
            }));
        }

        // Tier 2: keyword overlap within the same type and user scope.
        if keywords.is_empty() {
            return Ok(None);
        }
        let filters = RecallFilters {
            user_id: user_id.map(ToString::to_string),
            session_id: None,
            memory_type: Some(memory_type),
        };
        let candidates = store.query_by_keywords(keywords, 16, &filters)?;
        let mut best: Option<DuplicateHit> = None;
        for (candidate, _) in candidates {
            let similarity = jaccard(keywords, &candidate.keywords);
            if similarity >= self.near_threshold
                && best.as_ref().is_none_or(|b| similarity > b.similarity)
            {
                best = Some(DuplicateHit {
                    memory_id: candidate.id,
                    kind: DuplicateKind::Near,
                    similarity,
                });
            }
        }
        if best.is_some() {
            metrics::counter!("dedup_hits_total", "kind" => "near").increment(1);
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_produces_64_char_hex() {
        let hash = ContentHasher::hash("test content");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_normalisation_collapses_case_and_whitespace() {
        let h1 = ContentHasher::hash("Team uses PostgreSQL 14");
        let h2 = ContentHasher::hash("  team   uses\tpostgresql 14 ");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_different_content_different_hash() {
        assert_ne!(
            ContentHasher::hash("Use PostgreSQL"),
            ContentHasher::hash("Use MySQL")
        );
    }

    #[test]
    fn test_jaccard() {
        let a = vec!["redis".to_string(), "cache".to_string()];
        let b = vec!["redis".to_string(), "cache".to_string()];
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);

        let c = vec!["redis".to_string(), "queue".to_string()];
        assert!((jaccard(&a, &c) - 1.0 / 3.0).abs() < 1e-9);

        assert!((jaccard(&[], &[]) - 0.0).abs() < f64::EPSILON);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Hash output is always 64 hex characters.
            #[test]
            fn prop_hash_length(content in any::<String>()) {
                let hash = ContentHasher::hash(&content);
                prop_assert_eq!(hash.len(), 64);
            }

            /// Normalisation is idempotent.
            #[test]
            fn prop_normalize_idempotent(content in any::<String>()) {
                let once = ContentHasher::normalize(&content);
                let twice = ContentHasher::normalize(&once);
                prop_assert_eq!(once, twice);
            }

            /// Whitespace and case never change the hash.
            #[test]
            fn prop_hash_invariant(content in "[a-z ]{1,50}") {
                let padded = format!("  {}  ", content.to_uppercase());
                prop_assert_eq!(ContentHasher::hash(&content), ContentHasher::hash(&padded));
            }

            /// Jaccard is symmetric and bounded.
            #[test]
            fn prop_jaccard_symmetric(
                a in proptest::collection::vec("[a-z]{1,8}", 0..8),
                b in proptest::collection::vec("[a-z]{1,8}", 0..8),
            ) {
                let ab = jaccard(&a, &b);
                let ba = jaccard(&b, &a);
                prop_assert!((ab - ba).abs() < 1e-12);
                prop_assert!((0.0..=1.0).contains(&ab));
            }
        }
    }
}
