//! The recall engine: strategies, ranking, and caches.
//!
//! `recall` turns a free-text query into the top-K relevant live memories.
//! The query is fingerprinted and checked against a TTL'd LRU cache; on a
//! miss, candidate memories come from one of three strategies (keyword,
//! entity, temporal) chosen automatically from the query's shape, and are
//! ranked by a fixed blend of match score, importance, type weight,
//! freshness, and access frequency.
//!
//! A soft deadline bounds the whole operation: when it fires the engine
//! returns the best partial result collected so far instead of failing.

// Allow cast lints for duration/score conversions.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::expect_used)] // static regex

mod cache;
mod enhance;
mod fingerprint;

pub use cache::{RecallCaches, TtlCache};
pub use enhance::{EnhancedPrompt, Enhancer};
pub use fingerprint::{learn_fingerprint, query_fingerprint};

use crate::classify::{extract_entity_names, term_frequencies};
use crate::config::MemoryConfig;
use crate::models::{Memory, RecallOptions, RecallResult, RecallStrategy, ScoredMemory};
use crate::storage::MemoryStore;
use crate::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Temporal cues that steer short queries to the temporal strategy.
static TEMPORAL_CUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(recent|recently|today|yesterday|latest|newest|just\s+now|last\s+(week|night|sprint|session))\b")
        .expect("static regex: temporal cues")
});

/// Ranking weights from the selection formula.
const WEIGHT_BASE: f64 = 0.55;
const WEIGHT_IMPORTANCE: f64 = 0.20;
const WEIGHT_TYPE: f64 = 0.10;
const WEIGHT_FRESHNESS: f64 = 0.10;
const WEIGHT_ACCESS: f64 = 0.05;

/// Freshness decay constant, in days.
const FRESHNESS_TAU_DAYS: f64 = 30.0;

/// Candidate over-fetch multiplier per strategy.
const CANDIDATE_FACTOR: usize = 4;

/// The recall engine.
///
/// Cheap to clone; the store and caches are shared handles.
#[derive(Debug, Clone)]
pub struct RecallEngine {
    store: MemoryStore,
    caches: Arc<RecallCaches>,
    enhancer: Enhancer,
    /// Auto-mode fallback order.
    strategy_order: Vec<RecallStrategy>,
    /// Soft deadline for recall.
    deadline: Duration,
}

impl RecallEngine {
    /// Creates the engine over a store with shared caches.
    #[must_use]
    pub fn new(store: MemoryStore, caches: Arc<RecallCaches>, config: &MemoryConfig) -> Self {
        Self {
            store,
            caches,
            enhancer: Enhancer::new(),
            strategy_order: config.recall.strategies.clone(),
            deadline: Duration::from_millis(config.performance.max_recall_time_ms),
        }
    }

    /// Returns the shared cache pair.
    #[must_use]
    pub fn caches(&self) -> &Arc<RecallCaches> {
        &self.caches
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Recalls the memories most relevant to a query.
    ///
    /// # Errors
    ///
    /// Propagates store failures. A deadline is not an error: the result is
    /// returned with `strategy_used = "partial"`.
    #[instrument(skip(self, query, opts), fields(strategy = %opts.strategy, max = opts.max_memories))]
    pub fn recall(&self, query: &str, opts: &RecallOptions) -> Result<RecallResult> {
        let start = Instant::now();
        let fp = query_fingerprint(query, opts);

        if let Some(mut cached) = self.caches.recall.get(&fp) {
            cached.elapsed_ms = start.elapsed().as_millis() as u64;
            return Ok(cached);
        }

        let deadline = start + self.deadline;
        let now = Utc::now();
        let query_tf = term_frequencies(query);
        let query_keywords: Vec<String> = query_tf.keys().cloned().collect();
        let query_entities = extract_entity_names(query);

        let order = self.strategy_plan(opts.strategy, &query_tf, &query_entities, query);
        let limit = CANDIDATE_FACTOR * opts.max_memories.max(1);

        // Candidates accumulate across strategies so a deadline mid-plan can
        // still rank whatever has been collected.
        let mut pool: HashMap<String, (Memory, f64)> = HashMap::new();
        let mut result: Option<RecallResult> = None;

        for strategy in order {
            if Instant::now() >= deadline {
                let elapsed = start.elapsed().as_millis() as u64;
                metrics::counter!("recall_deadline_total").increment(1);
                result = Some(Self::build_result(
                    rank(pool.drain().map(|(_, v)| v).collect(), now),
                    opts.max_memories,
                    "partial",
                    elapsed,
                ));
                break;
            }

            let candidates = match strategy {
                RecallStrategy::Keyword => self.keyword_candidates(&query_keywords, &query_tf, limit, opts)?,
                RecallStrategy::Entity => self.entity_candidates(&query_entities, limit, opts)?,
                RecallStrategy::Temporal => self.temporal_candidates(limit, opts, now)?,
                RecallStrategy::Auto => Vec::new(),
            };

            for (memory, score) in candidates {
                pool.entry(memory.id.as_str().to_string())
                    .and_modify(|(_, existing)| *existing = existing.max(score))
                    .or_insert((memory, score));
            }

            if !pool.is_empty() {
                let elapsed = start.elapsed().as_millis() as u64;
                result = Some(Self::build_result(
                    rank(pool.drain().map(|(_, v)| v).collect(), now),
                    opts.max_memories,
                    strategy.as_str(),
                    elapsed,
                ));
                break;
            }
        }

        let result = result.unwrap_or_else(|| {
            RecallResult::empty(opts.strategy.as_str(), start.elapsed().as_millis() as u64)
        });

        metrics::histogram!("recall_duration_ms", "strategy" => result.strategy_used.clone())
            .record(result.elapsed_ms as f64);
        self.caches.recall.put(fp, result.clone());
        Ok(result)
    }

    /// Rewrites a prompt by prepending recalled context.
    ///
    /// # Errors
    ///
    /// Propagates recall failures; an empty recall passes the prompt through
    /// unchanged.
    pub fn enhance(&self, prompt: &str, opts: &RecallOptions) -> Result<EnhancedPrompt> {
        let start = Instant::now();
        let fp = query_fingerprint(prompt, opts);
        if let Some(mut cached) = self.caches.enhance.get(&fp) {
            cached.elapsed_ms = start.elapsed().as_millis() as u64;
            return Ok(cached);
        }

        let recall = self.recall(prompt, opts)?;
        let mut enhanced = self.enhancer.compose(prompt, &recall);
        enhanced.elapsed_ms = start.elapsed().as_millis() as u64;
        self.caches.enhance.put(fp, enhanced.clone());
        Ok(enhanced)
    }

    /// Access bookkeeping for a returned result.
    ///
    /// Deliberately separate from [`Self::recall`]: callers invoke it after
    /// the response has been written so bookkeeping never adds to the
    /// latency a client observes. Does not flush caches (a count bump cannot
    /// make a cached result incoherent).
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn record_access(&self, result: &RecallResult) -> Result<()> {
        let ids: Vec<crate::models::MemoryId> = result
            .memories
            .iter()
            .map(|s| s.memory.id.clone())
            .collect();
        self.store.update_access(&ids, Utc::now())
    }

    /// Builds the strategy execution plan.
    ///
    /// Explicit strategies run alone. Auto mode picks a primary from the
    /// query shape, then appends the configured fallback order.
    fn strategy_plan(
        &self,
        requested: RecallStrategy,
        query_tf: &HashMap<String, usize>,
        query_entities: &[String],
        query: &str,
    ) -> Vec<RecallStrategy> {
        if requested != RecallStrategy::Auto {
            return vec![requested];
        }

        let primary = if !query_entities.is_empty() {
            RecallStrategy::Entity
        } else if query_tf.len() <= 3 && TEMPORAL_CUES.is_match(query) {
            RecallStrategy::Temporal
        } else {
            RecallStrategy::Keyword
        };

        let mut plan = vec![primary];
        for fallback in &self.strategy_order {
            if *fallback != primary && !plan.contains(fallback) {
                plan.push(*fallback);
            }
        }
        plan
    }

    /// Keyword candidates scored by tf-weighted Jaccard.
    fn keyword_candidates(
        &self,
        query_keywords: &[String],
        query_tf: &HashMap<String, usize>,
        limit: usize,
        opts: &RecallOptions,
    ) -> Result<Vec<(Memory, f64)>> {
        let hits = self
            .store
            .query_by_keywords(query_keywords, limit, &opts.filters)?;
        Ok(hits
            .into_iter()
            .map(|(memory, _)| {
                let terms = MemoryStore::index_terms(&memory);
                let score = weighted_jaccard(query_tf, &terms.into_iter().collect());
                (memory, score)
            })
            .collect())
    }

    /// Entity candidates scored by the fraction of query entities mentioned.
    fn entity_candidates(
        &self,
        query_entities: &[String],
        limit: usize,
        opts: &RecallOptions,
    ) -> Result<Vec<(Memory, f64)>> {
        self.store
            .query_by_entities(query_entities, limit, &opts.filters)
    }

    /// Recency candidates scored by type-dependent exponential decay.
    fn temporal_candidates(
        &self,
        limit: usize,
        opts: &RecallOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Memory, f64)>> {
        let recent = self.store.query_recent(limit, &opts.filters)?;
        Ok(recent
            .into_iter()
            .map(|memory| {
                let tau = memory.memory_type.recency_tau_seconds();
                let score = (-memory.age_seconds(now) / tau).exp();
                (memory, score)
            })
            .collect())
    }

    /// Truncates ranked candidates and derives the result confidence.
    fn build_result(
        mut ranked: Vec<ScoredMemory>,
        max_memories: usize,
        strategy_used: &str,
        elapsed_ms: u64,
    ) -> RecallResult {
        ranked.truncate(max_memories);
        let confidence = if ranked.is_empty() {
            0.0
        } else {
            let sum: f64 = ranked.iter().map(|s| s.final_score).sum();
            (sum / ranked.len() as f64).clamp(0.0, 1.0)
        };
        RecallResult {
            memories: ranked,
            strategy_used: strategy_used.to_string(),
            confidence,
            elapsed_ms,
        }
    }
}

/// tf-weighted Jaccard between query terms and a memory's index terms.
///
/// Query terms weigh their query frequency; memory-only terms weigh 1.
#[must_use]
pub fn weighted_jaccard(query_tf: &HashMap<String, usize>, memory_terms: &HashSet<String>) -> f64 {
    let mut intersection = 0.0;
    let mut union = 0.0;
    for (term, tf) in query_tf {
        let weight = *tf as f64;
        union += weight;
        if memory_terms.contains(term) {
            intersection += weight;
        }
    }
    for term in memory_terms {
        if !query_tf.contains_key(term) {
            union += 1.0;
        }
    }
    if union == 0.0 { 0.0 } else { intersection / union }
}

/// Ranks candidates with the fixed weight blend and a deterministic
/// tie-break (newer first, then lexicographically smaller id).
#[must_use]
pub fn rank(candidates: Vec<(Memory, f64)>, now: DateTime<Utc>) -> Vec<ScoredMemory> {
    let access_max = candidates
        .iter()
        .map(|(m, _)| m.access_count)
        .max()
        .unwrap_or(0);
    let access_norm = ((access_max as f64) + 1.0).ln();

    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|(memory, base)| {
            let freshness = (-(memory.age_seconds(now) / 86_400.0) / FRESHNESS_TAU_DAYS).exp();
            let access_term = if access_max == 0 {
                0.0
            } else {
                ((memory.access_count as f64) + 1.0).ln() / access_norm
            };
            let final_score = WEIGHT_BASE * base.clamp(0.0, 1.0)
                + WEIGHT_IMPORTANCE * memory.importance
                + WEIGHT_TYPE * memory.memory_type.type_weight()
                + WEIGHT_FRESHNESS * freshness
                + WEIGHT_ACCESS * access_term;
            ScoredMemory {
                memory,
                base_score: base,
                final_score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    scored
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::{MemoryConfig, PerformanceConfig};
    use crate::models::{MemoryId, MemoryType, RecallFilters};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn engine_with(tmp: &TempDir, config: &MemoryConfig) -> RecallEngine {
        let store = MemoryStore::open(&tmp.path().join("memorydb"), config).expect("open store");
        let caches = Arc::new(RecallCaches::new(
            config.recall.cache_entries,
            Duration::from_secs(config.recall.cache_ttl_secs),
        ));
        RecallEngine::new(store, caches, config)
    }

    fn seed(engine: &RecallEngine, content: &str, memory_type: MemoryType, age: ChronoDuration, importance: f64) -> MemoryId {
        let created = Utc::now() - age;
        let mut memory = Memory::new(content, memory_type, created);
        memory.importance = importance;
        memory.keywords = crate::classify::extract_keywords(content, &crate::classify::extract_entity_names(content), 16);
        memory.entities = crate::classify::extract_entity_names(content);
        let refs: Vec<crate::models::EntityRef> = memory
            .entities
            .iter()
            .map(|e| crate::models::EntityRef::new(e.clone(), "name"))
            .collect();
        engine.store().put(&memory, &refs, false).expect("seed put")
    }

    #[test]
    fn test_keyword_recall_with_type_priority() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);

        let a = seed(&engine, "Prefer FastAPI over Flask", MemoryType::Preference, ChronoDuration::days(30), 0.75);
        let b = seed(&engine, "currently tweaking FastAPI router", MemoryType::Working, ChronoDuration::hours(1), 0.45);

        let result = engine
            .recall("fastapi", &RecallOptions { max_memories: 2, ..RecallOptions::default() })
            .expect("recall");
        assert_eq!(result.memories.len(), 2);
        assert_eq!(result.strategy_used, "keyword");
        // Importance and type weight dominate freshness for the low-importance
        // working memory.
        assert_eq!(result.memories[0].memory.id, a);
        assert_eq!(result.memories[1].memory.id, b);
        assert!(result.memories[0].final_score > result.memories[1].final_score);
    }

    #[test]
    fn test_auto_falls_back_to_temporal() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);

        seed(&engine, "Use asyncio for I/O", MemoryType::Semantic, ChronoDuration::seconds(30), 0.5);
        seed(&engine, "Project uses Redis", MemoryType::Semantic, ChronoDuration::seconds(5), 0.5);

        // No keyword or entity overlap: the engine walks the fallback order
        // down to temporal.
        let result = engine.recall("How do I cache?", &RecallOptions::default()).expect("recall");
        assert_eq!(result.strategy_used, "temporal");
        assert_eq!(result.memories.len(), 2);
        assert_eq!(result.memories[0].memory.content, "Project uses Redis");
    }

    #[test]
    fn test_temporal_cue_selects_temporal() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);
        seed(&engine, "shipped the importer", MemoryType::Episodic, ChronoDuration::hours(2), 0.6);

        let result = engine.recall("recent work", &RecallOptions::default()).expect("recall");
        assert_eq!(result.strategy_used, "temporal");
        assert_eq!(result.memories.len(), 1);
    }

    #[test]
    fn test_entity_primary_when_query_has_entities() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);
        seed(&engine, "Prefer FastAPI over Flask", MemoryType::Preference, ChronoDuration::days(1), 0.75);

        let result = engine.recall("FastAPI routing", &RecallOptions::default()).expect("recall");
        assert_eq!(result.strategy_used, "entity");
        assert_eq!(result.memories.len(), 1);
    }

    #[test]
    fn test_recall_deterministic() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);
        for content in [
            "alpha service owns billing",
            "beta service owns invoices",
            "gamma service owns billing and invoices",
        ] {
            seed(&engine, content, MemoryType::Semantic, ChronoDuration::hours(3), 0.5);
        }

        let opts = RecallOptions::default();
        let first = engine.recall("billing service", &opts).expect("first");
        engine.caches().flush_all();
        let second = engine.recall("billing service", &opts).expect("second");
        assert_eq!(first.ids(), second.ids());
    }

    #[test]
    fn test_cache_hit_and_flush() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);
        seed(&engine, "Project uses Redis", MemoryType::Semantic, ChronoDuration::minutes(1), 0.5);

        let opts = RecallOptions::default();
        let _ = engine.recall("redis", &opts).expect("fill");
        assert_eq!(engine.caches().recall.len(), 1);

        // A write would flush; simulate the learner's flush.
        engine.caches().flush_all();
        assert!(engine.caches().recall.is_empty());
    }

    #[test]
    fn test_zero_deadline_returns_partial() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig {
            performance: PerformanceConfig {
                max_recall_time_ms: 0,
                ..PerformanceConfig::default()
            },
            ..MemoryConfig::default()
        };
        let engine = engine_with(&tmp, &config);
        seed(&engine, "Project uses Redis", MemoryType::Semantic, ChronoDuration::minutes(1), 0.5);

        let result = engine.recall("redis", &RecallOptions::default()).expect("recall");
        assert_eq!(result.strategy_used, "partial");
    }

    #[test]
    fn test_explicit_strategy_runs_alone() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);
        seed(&engine, "Project uses Redis", MemoryType::Semantic, ChronoDuration::minutes(1), 0.5);

        let opts = RecallOptions {
            strategy: RecallStrategy::Keyword,
            ..RecallOptions::default()
        };
        // "recent changes" shares no keywords; an explicit keyword strategy
        // must not fall back to temporal.
        let result = engine.recall("unrelated nonsense", &opts).expect("recall");
        assert!(result.memories.is_empty());
        assert_eq!(result.strategy_used, "keyword");
    }

    #[test]
    fn test_filters_restrict_scope() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);

        let mut memory = Memory::new("redis belongs to alice", MemoryType::Semantic, Utc::now());
        memory.user_id = Some("alice".to_string());
        memory.keywords = vec!["redis".to_string(), "belong".to_string()];
        engine.store().put(&memory, &[], false).expect("put");

        let opts = RecallOptions {
            filters: RecallFilters {
                user_id: Some("bob".to_string()),
                ..RecallFilters::default()
            },
            strategy: RecallStrategy::Keyword,
            ..RecallOptions::default()
        };
        let result = engine.recall("redis", &opts).expect("recall");
        assert!(result.memories.is_empty());
    }

    #[test]
    fn test_record_access_bumps_counts() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::default();
        let engine = engine_with(&tmp, &config);
        let id = seed(&engine, "Project uses Redis", MemoryType::Semantic, ChronoDuration::minutes(1), 0.5);

        let result = engine.recall("redis", &RecallOptions::default()).expect("recall");
        assert_eq!(result.memories.len(), 1);
        engine.record_access(&result).expect("record");

        let bumped = engine.store().get(&id).expect("get").unwrap();
        assert_eq!(bumped.access_count, 1);
    }

    #[test]
    fn test_weighted_jaccard() {
        let mut tf = HashMap::new();
        tf.insert("redis".to_string(), 2);
        tf.insert("cache".to_string(), 1);
        let terms: HashSet<String> = ["redis", "layer"].iter().map(ToString::to_string).collect();
        // intersection: redis (2); union: redis(2) + cache(1) + layer(1) = 4
        assert!((weighted_jaccard(&tf, &terms) - 0.5).abs() < 1e-12);
        assert!((weighted_jaccard(&HashMap::new(), &HashSet::new()) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rank_tie_breaks() {
        let now = Utc::now();
        let older = Memory::new("same", MemoryType::Semantic, now - ChronoDuration::hours(1));
        let newer = Memory::new("same", MemoryType::Semantic, now);
        // Force identical scores by matching importance and freshness inputs.
        let mut a = older.clone();
        a.created_at = newer.created_at;
        a.id = MemoryId::new("bbb");
        let mut b = newer.clone();
        b.id = MemoryId::new("aaa");

        let ranked = rank(vec![(a, 0.5), (b, 0.5)], now);
        // Equal score and timestamp: lexicographically smaller id first.
        assert_eq!(ranked[0].memory.id.as_str(), "aaa");
    }
}
