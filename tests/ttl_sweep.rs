//! Retention and TTL sweep behaviour.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use kuzu_memory::config::{LearningConfig, MemoryConfig};
use kuzu_memory::recall::RecallCaches;
use kuzu_memory::{
    LearnRequest, Learner, MemoryStore, MemoryType, RecallEngine, RecallOptions, RecallStrategy,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn pipeline(tmp: &TempDir) -> (Learner, RecallEngine, MemoryStore) {
    let config = MemoryConfig {
        learning: LearningConfig {
            min_content_length: 5,
            ..LearningConfig::default()
        },
        ..MemoryConfig::default()
    };
    let store = MemoryStore::open(&tmp.path().join("memorydb"), &config).expect("open store");
    let caches = Arc::new(RecallCaches::new(64, Duration::from_secs(60)));
    let learner = Learner::new(store.clone(), Arc::clone(&caches), &config, None).expect("learner");
    let engine = RecallEngine::new(store.clone(), caches, &config);
    (learner, engine, store)
}

#[test]
fn test_retention_windows_match_types() {
    let tmp = TempDir::new().expect("tempdir");
    let (learner, _engine, store) = pipeline(&tmp);

    let cases = [
        (MemoryType::Semantic, None),
        (MemoryType::Episodic, Some(chrono::Duration::days(30))),
        (MemoryType::Working, Some(chrono::Duration::days(1))),
        (MemoryType::Sensory, Some(chrono::Duration::hours(6))),
    ];
    for (index, (memory_type, retention)) in cases.into_iter().enumerate() {
        let outcome = learner
            .learn(&LearnRequest {
                content: format!("retention probe number {index} for the sweep test"),
                memory_type: Some(memory_type),
                ..LearnRequest::default()
            })
            .expect("learn");
        let memory = store
            .get(outcome.memory_id().expect("id"))
            .expect("get")
            .expect("present");
        assert_eq!(
            memory.valid_to.map(|t| t - memory.created_at),
            retention,
            "retention mismatch for {memory_type}"
        );
    }
}

#[test]
fn test_sweep_reclaims_expired_sensory() {
    let tmp = TempDir::new().expect("tempdir");
    let (learner, engine, store) = pipeline(&tmp);

    // Created 7 hours ago: past the 6-hour sensory retention.
    let outcome = learner
        .learn(&LearnRequest {
            content: "the staging dashboard feels sluggish right now".to_string(),
            memory_type: Some(MemoryType::Sensory),
            created_at: Some(chrono::Utc::now() - chrono::Duration::hours(7)),
            ..LearnRequest::default()
        })
        .expect("learn");
    let stale_id = outcome.memory_id().expect("id").clone();

    let swept = store.sweep_expired(chrono::Utc::now()).expect("sweep");
    assert_eq!(swept, 1);
    engine.caches().flush_all();

    assert!(store.get(&stale_id).expect("get").is_none());
    let result = engine
        .recall(
            "staging dashboard sluggish",
            &RecallOptions {
                strategy: RecallStrategy::Keyword,
                ..RecallOptions::default()
            },
        )
        .expect("recall");
    assert!(result.memories.is_empty());
}

#[test]
fn test_expired_memory_never_recalled_even_before_sweep() {
    let tmp = TempDir::new().expect("tempdir");
    let (learner, engine, _store) = pipeline(&tmp);

    learner
        .learn(&LearnRequest {
            content: "working note about the flaky importer retry loop".to_string(),
            memory_type: Some(MemoryType::Working),
            created_at: Some(chrono::Utc::now() - chrono::Duration::days(2)),
            ..LearnRequest::default()
        })
        .expect("learn");

    for strategy in [
        RecallStrategy::Keyword,
        RecallStrategy::Temporal,
        RecallStrategy::Auto,
    ] {
        let result = engine
            .recall(
                "importer retry",
                &RecallOptions {
                    strategy,
                    ..RecallOptions::default()
                },
            )
            .expect("recall");
        assert!(
            result.memories.is_empty(),
            "expired memory leaked via {strategy:?}"
        );
    }
}

#[test]
fn test_sweep_is_idempotent() {
    let tmp = TempDir::new().expect("tempdir");
    let (learner, _engine, store) = pipeline(&tmp);

    learner
        .learn(&LearnRequest {
            content: "short lived sensory observation for the idempotence test".to_string(),
            memory_type: Some(MemoryType::Sensory),
            created_at: Some(chrono::Utc::now() - chrono::Duration::hours(8)),
            ..LearnRequest::default()
        })
        .expect("learn");

    assert_eq!(store.sweep_expired(chrono::Utc::now()).expect("sweep"), 1);
    assert_eq!(store.sweep_expired(chrono::Utc::now()).expect("sweep"), 0);
}
