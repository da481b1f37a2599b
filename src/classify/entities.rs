//! Fixed-rule entity extraction.
//!
//! Extracts proper nouns, identifiers, URLs, file paths, quoted strings, and
//! version numbers with static regex rules. No model inference: extraction
//! must be deterministic and cheap enough for the ingest hot path.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use crate::models::EntityRef;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// URLs with an explicit scheme.
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bhttps?://[^\s"'<>)]+"#).expect("static regex: url")
});

/// File paths: two or more segments separated by `/`, with an extension or a
/// leading anchor.
static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\.{0,2}/)?[\w.-]+(?:/[\w.-]+)+|[\w-]+\.(?:rs|py|ts|js|go|java|yaml|yml|toml|json|md|sql)\b")
        .expect("static regex: path")
});

/// Version numbers: `v1.2.3`, `2.0`, `14.5.1`.
static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bv?\d+\.\d+(?:\.\d+)*\b").expect("static regex: version"));

/// Double- or single-quoted strings and backtick spans.
static QUOTED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]{2,80})"|(?:^|[\s(])'([^']{2,80})'|`([^`]{2,80})`"#)
        .expect("static regex: quoted")
});

/// Runs of two or more capitalised words ("Acme Corp", "New York").
static CAPITALISED_RUN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("static regex: capitalised run")
});

/// Single-token identifiers with interior capitals or all-caps acronyms
/// (`PostgreSQL`, `FastAPI`, `AWS`).
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Z]{2,}[a-z0-9]*|[A-Z][a-z]+[A-Z][A-Za-z]*|[a-z]+[A-Z][A-Za-z]+)\b")
        .expect("static regex: identifier")
});

/// Extracts entities from content.
///
/// Matches are deduplicated by normalised name; first occurrence order is
/// preserved so extraction is deterministic.
#[must_use]
pub fn extract_entities(content: &str) -> Vec<EntityRef> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut entities: Vec<EntityRef> = Vec::new();

    let mut push = |name: &str, kind: &str| {
        let entity = EntityRef::new(name.trim(), kind);
        if entity.normalized_name.len() >= 2 && seen.insert(entity.normalized_name.clone()) {
            entities.push(entity);
        }
    };

    for m in URL_PATTERN.find_iter(content) {
        push(m.as_str(), "url");
    }
    for caps in QUOTED_PATTERN.captures_iter(content) {
        if let Some(inner) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            push(inner.as_str(), "quoted");
        }
    }
    for m in PATH_PATTERN.find_iter(content) {
        // URLs already matched above contain slashes; skip their fragments.
        if !content[..m.start()].ends_with("://") && !m.as_str().contains("://") {
            push(m.as_str(), "path");
        }
    }
    for m in CAPITALISED_RUN_PATTERN.find_iter(content) {
        push(m.as_str(), "name");
    }
    for m in IDENTIFIER_PATTERN.find_iter(content) {
        push(m.as_str(), "name");
    }
    for m in VERSION_PATTERN.find_iter(content) {
        push(m.as_str(), "version");
    }

    entities
}

/// Returns just the entity names, for callers that store flat strings.
#[must_use]
pub fn extract_entity_names(content: &str) -> Vec<String> {
    extract_entities(content).into_iter().map(|e| e.name).collect()
}
