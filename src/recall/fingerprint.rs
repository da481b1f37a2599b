//! Query fingerprints.
//!
//! A fingerprint is the stable hash of a normalised query plus the options
//! that shape its result. It keys both result caches and the learn queue's
//! coalescing map, so it must be canonical: equivalent queries with
//! equivalent options always collide.

use crate::classify::normalise;
use crate::models::RecallOptions;
use sha2::{Digest, Sha256};

/// Computes the cache key for a query/options pair.
///
/// The options are serialised field-by-field in a fixed order rather than
/// through serde so that map ordering or format drift can never change the
/// key.
#[must_use]
pub fn query_fingerprint(query: &str, opts: &RecallOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalise(query).as_bytes());
    hasher.update([0x1f]);
    hasher.update(opts.max_memories.to_le_bytes());
    hasher.update(opts.strategy.as_str().as_bytes());
    for field in [
        opts.filters.user_id.as_deref(),
        opts.filters.session_id.as_deref(),
        opts.filters.memory_type.map(|t| t.as_str()),
    ] {
        hasher.update([0x1f]);
        hasher.update(field.unwrap_or("").as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Computes the coalescing key for learn content.
///
/// Learn tasks have no options; the fingerprint is the normalised content
/// hash scoped by user so identical observations from different users never
/// coalesce.
#[must_use]
pub fn learn_fingerprint(content: &str, user_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalise(content).as_bytes());
    hasher.update([0x1f]);
    hasher.update(user_id.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryType, RecallFilters, RecallStrategy};

    #[test]
    fn test_whitespace_and_case_invariant() {
        let opts = RecallOptions::default();
        assert_eq!(
            query_fingerprint("How do I cache?", &opts),
            query_fingerprint("  how   do i CACHE? ", &opts)
        );
    }

    #[test]
    fn test_options_change_the_key() {
        let base = RecallOptions::default();
        let fp = query_fingerprint("redis", &base);

        let more = RecallOptions {
            max_memories: 10,
            ..base.clone()
        };
        assert_ne!(fp, query_fingerprint("redis", &more));

        let strategy = RecallOptions {
            strategy: RecallStrategy::Temporal,
            ..base.clone()
        };
        assert_ne!(fp, query_fingerprint("redis", &strategy));

        let filtered = RecallOptions {
            filters: RecallFilters {
                user_id: Some("alice".to_string()),
                session_id: None,
                memory_type: Some(MemoryType::Preference),
            },
            ..base
        };
        assert_ne!(fp, query_fingerprint("redis", &filtered));
    }

    #[test]
    fn test_filter_fields_are_delimited() {
        // user_id "ab" + session "" must not collide with user "a" + session "b".
        let a = RecallOptions {
            filters: RecallFilters {
                user_id: Some("ab".to_string()),
                ..RecallFilters::default()
            },
            ..RecallOptions::default()
        };
        let b = RecallOptions {
            filters: RecallFilters {
                user_id: Some("a".to_string()),
                session_id: Some("b".to_string()),
                memory_type: None,
            },
            ..RecallOptions::default()
        };
        assert_ne!(query_fingerprint("q", &a), query_fingerprint("q", &b));
    }

    #[test]
    fn test_learn_fingerprint_scoped_by_user() {
        assert_eq!(
            learn_fingerprint("Team uses PostgreSQL 14", None),
            learn_fingerprint("team  uses  postgresql 14", None)
        );
        assert_ne!(
            learn_fingerprint("Team uses PostgreSQL 14", Some("alice")),
            learn_fingerprint("Team uses PostgreSQL 14", Some("bob"))
        );
    }
}
