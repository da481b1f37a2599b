//! The learn pipeline: classify, deduplicate, persist.
//!
//! One code path serves every ingest route (queue workers, CLI, git
//! importer): secrets filtering and length validation first, then
//! classification, then the duplicate check, then either a bump of the
//! existing memory or a fresh row. Both result caches flush after any
//! successful write so recall stays coherent.

use crate::classify::{Classifier, ClassifyHints};
use crate::config::MemoryConfig;
use crate::dedup::{Deduplicator, SecretFilter};
use crate::models::{LearnOutcome, LearnRequest, Memory, SourceType};
use crate::recall::RecallCaches;
use crate::storage::MemoryStore;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Maximum accepted content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 4096;

/// The shared ingest pipeline.
#[derive(Debug)]
pub struct Learner {
    classifier: Classifier,
    dedup: Deduplicator,
    secrets: SecretFilter,
    store: MemoryStore,
    caches: Arc<RecallCaches>,
    /// Minimum content length for interactive sources.
    min_content_length: usize,
    /// Minimum content length for git-sync content.
    git_min_content_length: usize,
    /// Identity applied when a request carries no `user_id`.
    default_user_id: Option<String>,
}

impl Learner {
    /// Builds the pipeline over a store and shared caches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a configured secrets pattern fails to
    /// compile.
    pub fn new(
        store: MemoryStore,
        caches: Arc<RecallCaches>,
        config: &MemoryConfig,
        default_user_id: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            classifier: Classifier::new(),
            dedup: Deduplicator::new(config.learning.near_duplicate_threshold),
            secrets: SecretFilter::with_patterns(&config.learning.excluded_patterns)?,
            store,
            caches,
            min_content_length: config.learning.min_content_length,
            git_min_content_length: config.git_sync.min_message_length,
            default_user_id,
        })
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Runs the pipeline on one request.
    ///
    /// Skipped content (secrets, too short) is an outcome, not an error:
    /// interactive hooks treat both as success with a note.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] for empty or oversized content and
    /// propagates store failures.
    #[instrument(skip(self, request), fields(source = request.source.as_str()))]
    pub fn learn(&self, request: &LearnRequest) -> Result<LearnOutcome> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(Error::Invalid("content must not be empty".to_string()));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(Error::Invalid(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }

        if let Some(hit) = self.secrets.detect(content) {
            tracing::info!(pattern = %hit.pattern, "content rejected by secrets filter");
            metrics::counter!("learn_skipped_total", "reason" => "secret").increment(1);
            return Ok(LearnOutcome::SkippedSecret {
                pattern: hit.pattern,
            });
        }

        let min = if request.source == SourceType::GitSync {
            self.git_min_content_length
        } else {
            self.min_content_length
        };
        let length = content.chars().count();
        if length < min {
            metrics::counter!("learn_skipped_total", "reason" => "too_short").increment(1);
            return Ok(LearnOutcome::SkippedTooShort { length, min });
        }

        let classification = self.classifier.classify(
            content,
            ClassifyHints {
                source: Some(request.source),
                memory_type: request.memory_type,
            },
        );
        let user_id = request
            .user_id
            .clone()
            .or_else(|| self.default_user_id.clone());

        let content_hash = crate::dedup::ContentHasher::hash(content);
        if let Some(duplicate) = self.dedup.find_duplicate(
            &self.store,
            &content_hash,
            &classification.keywords,
            classification.memory_type,
            user_id.as_deref(),
        )? {
            self.store.bump_duplicate(&duplicate.memory_id, Utc::now())?;
            self.caches.flush_all();
            return Ok(LearnOutcome::Updated {
                memory_id: duplicate.memory_id,
            });
        }

        let created_at = request.created_at.unwrap_or_else(Utc::now);
        let mut memory = Memory::new(content, classification.memory_type, created_at);
        // The learn itself counts as the first access; re-learns bump from here.
        memory.access_count = 1;
        memory.source_type = request.source;
        memory.session_id = request.session_id.clone();
        memory.agent_id = request.agent_id.clone();
        memory.user_id = user_id;
        memory.importance = classification.importance;
        memory.confidence = classification.confidence;
        memory.metadata = request.metadata.clone();
        memory.keywords = classification.keywords.clone();
        memory.entities = classification.entities.iter().map(|e| e.name.clone()).collect();

        let stored = match self.store.put(&memory, &classification.entities, false) {
            Ok(id) => LearnOutcome::Stored { memory_id: id },
            // A racing writer can beat the dedup check; fold into a bump.
            Err(Error::Conflict { existing }) => {
                self.store.bump_duplicate(&existing, Utc::now())?;
                LearnOutcome::Updated {
                    memory_id: existing,
                }
            },
            Err(e) => return Err(e),
        };
        self.caches.flush_all();
        Ok(stored)
    }
}
