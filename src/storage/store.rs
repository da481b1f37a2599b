//! CRUD over the property-graph schema.
//!
//! The store exclusively owns all memory rows. Every operation runs inside a
//! transaction scoped to a single pooled connection; writes go through the
//! shared handle's writer slot.
//!
//! # Schema
//!
//! Node tables: `memories`, `entities`, `sessions`. Edge tables:
//! `memory_keywords` (keyword occurrence), `mentions` (Memory → Entity),
//! `relates_to` (Memory → Memory, typed), `belongs_to` (Memory → Session).
//! Edges cascade on node deletion so the TTL sweep cannot leave dangling
//! references.

// Allow cast lints for epoch-millisecond and count conversions.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use super::database::SharedDatabase;
use super::row::{MEMORY_COLUMNS, memory_from_row};
use crate::config::MemoryConfig;
use crate::models::{EntityRef, Memory, MemoryId, MemoryType, RecallFilters, RelationKind};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// Aggregate counters returned by [`MemoryStore::stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    /// Live memories.
    pub memory_count: u64,
    /// Live memories per type.
    pub by_type: HashMap<String, u64>,
    /// Engine file size on disk.
    pub database_size_bytes: u64,
    /// Live memories created in the last 24 hours.
    pub recent_memories: u64,
    /// Per-user breakdown, present when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_stats: Option<UserStats>,
}

/// Per-user breakdown for detailed stats.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserStats {
    /// Distinct user scopes with live memories.
    pub total_users: u64,
    /// The user ids themselves.
    pub users: Vec<String>,
    /// The resolved identity of the caller.
    pub current_user: Option<String>,
}

/// Store over the shared database handle.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: Arc<SharedDatabase>,
    /// Warn threshold for the engine file size.
    max_size_bytes: u64,
}

impl MemoryStore {
    /// Opens the store, creating the schema when missing.
    ///
    /// # Errors
    ///
    /// Returns storage errors from handle opening or schema creation.
    pub fn open(db_path: &Path, config: &MemoryConfig) -> Result<Self> {
        let db = SharedDatabase::open(db_path, &config.performance)?;
        let store = Self {
            db,
            max_size_bytes: config.storage.max_size_mb * 1024 * 1024,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the shared handle (the queue and server drain it on shutdown).
    #[must_use]
    pub fn database(&self) -> &Arc<SharedDatabase> {
        &self.db
    }

    /// Creates node and edge tables plus their indexes.
    fn initialize(&self) -> Result<()> {
        self.db.with_write("initialize_schema", |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS memories (
                    id TEXT PRIMARY KEY,
                    content TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    memory_type TEXT NOT NULL,
                    source_type TEXT NOT NULL,
                    session_id TEXT,
                    agent_id TEXT,
                    user_id TEXT,
                    importance REAL NOT NULL,
                    confidence REAL NOT NULL,
                    access_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    accessed_at INTEGER NOT NULL,
                    valid_from INTEGER NOT NULL,
                    valid_to INTEGER,
                    metadata TEXT,
                    keywords TEXT,
                    entities TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_memories_hash_user
                    ON memories(content_hash, user_id);
                CREATE INDEX IF NOT EXISTS idx_memories_created
                    ON memories(created_at DESC);
                CREATE INDEX IF NOT EXISTS idx_memories_type
                    ON memories(memory_type);
                CREATE INDEX IF NOT EXISTS idx_memories_valid_to
                    ON memories(valid_to) WHERE valid_to IS NOT NULL;

                CREATE TABLE IF NOT EXISTS entities (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    normalized_name TEXT NOT NULL UNIQUE,
                    kind TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    started_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS memory_keywords (
                    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    keyword TEXT NOT NULL,
                    PRIMARY KEY (memory_id, keyword)
                );
                CREATE INDEX IF NOT EXISTS idx_memory_keywords_keyword
                    ON memory_keywords(keyword);

                CREATE TABLE IF NOT EXISTS mentions (
                    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                    weight REAL NOT NULL DEFAULT 1.0,
                    PRIMARY KEY (memory_id, entity_id)
                );
                CREATE INDEX IF NOT EXISTS idx_mentions_entity ON mentions(entity_id);

                CREATE TABLE IF NOT EXISTS relates_to (
                    from_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    to_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    similarity REAL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (from_id, to_id, kind)
                );

                CREATE TABLE IF NOT EXISTS belongs_to (
                    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                    PRIMARY KEY (memory_id, session_id)
                );",
            )
        })
    }

    /// Inserts a memory (or replaces it when `upsert` is set).
    ///
    /// Keyword, entity, and session edges are written in the same
    /// transaction. A live memory with the same `(content_hash, user_id)`
    /// fails with `Conflict` unless `upsert` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] on duplicate content,
    /// [`Error::BusyTimeout`] under write contention, or
    /// [`Error::OperationFailed`] on engine failure.
    #[instrument(skip(self, memory, entity_refs), fields(memory_id = %memory.id))]
    pub fn put(&self, memory: &Memory, entity_refs: &[EntityRef], upsert: bool) -> Result<MemoryId> {
        self.warn_if_over_size();
        let now_ms = Utc::now().timestamp_millis();

        let conflict = self.db.with_write("put", |conn| {
            if !upsert {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT id FROM memories
                         WHERE content_hash = ?1 AND user_id IS ?2 AND id != ?3
                           AND (valid_to IS NULL OR valid_to > ?4)",
                        params![memory.content_hash, memory.user_id, memory.id.as_str(), now_ms],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(existing) = existing {
                    return Ok(Some(existing));
                }
            }

            Self::write_memory_row(conn, memory)?;
            Self::write_edges(conn, memory, entity_refs)?;
            Ok(None)
        })?;

        if let Some(existing) = conflict {
            return Err(Error::Conflict {
                existing: MemoryId::new(existing),
            });
        }
        metrics::counter!("store_puts_total", "memory_type" => memory.memory_type.as_str())
            .increment(1);
        Ok(memory.id.clone())
    }

    /// Writes the memory node row.
    fn write_memory_row(conn: &Connection, memory: &Memory) -> rusqlite::Result<()> {
        let metadata_json = serde_json::to_string(&memory.metadata).unwrap_or_default();
        let keywords_json = serde_json::to_string(&memory.keywords).unwrap_or_default();
        let entities_json = serde_json::to_string(&memory.entities).unwrap_or_default();
        conn.execute(
            "INSERT OR REPLACE INTO memories
             (id, content, content_hash, memory_type, source_type, session_id, agent_id,
              user_id, importance, confidence, access_count, created_at, accessed_at,
              valid_from, valid_to, metadata, keywords, entities)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                memory.id.as_str(),
                memory.content,
                memory.content_hash,
                memory.memory_type.as_str(),
                memory.source_type.as_str(),
                memory.session_id,
                memory.agent_id,
                memory.user_id,
                memory.importance,
                memory.confidence,
                memory.access_count as i64,
                memory.created_at.timestamp_millis(),
                memory.accessed_at.timestamp_millis(),
                memory.valid_from.timestamp_millis(),
                memory.valid_to.map(|t| t.timestamp_millis()),
                metadata_json,
                keywords_json,
                entities_json,
            ],
        )?;
        Ok(())
    }

    /// Index terms for a memory: its keywords plus the stemmed tokens of its
    /// entity names, so queries like "fastapi" reach memories whose only
    /// mention of the term is an extracted entity.
    #[must_use]
    pub fn index_terms(memory: &Memory) -> std::collections::BTreeSet<String> {
        let mut terms: std::collections::BTreeSet<String> =
            memory.keywords.iter().cloned().collect();
        for entity in &memory.entities {
            for token in crate::classify::tokenize(entity) {
                let stemmed = crate::classify::keywords::stem(&token);
                if stemmed.len() >= 2 {
                    terms.insert(stemmed);
                }
            }
        }
        terms
    }

    /// Writes keyword, mention, and session edges for a memory.
    fn write_edges(
        conn: &Connection,
        memory: &Memory,
        entity_refs: &[EntityRef],
    ) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM memory_keywords WHERE memory_id = ?1",
            params![memory.id.as_str()],
        )?;
        for keyword in Self::index_terms(memory) {
            conn.execute(
                "INSERT OR REPLACE INTO memory_keywords (memory_id, keyword) VALUES (?1, ?2)",
                params![memory.id.as_str(), keyword],
            )?;
        }

        for entity in entity_refs {
            conn.execute(
                "INSERT INTO entities (id, name, normalized_name, kind)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(normalized_name) DO NOTHING",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    entity.name,
                    entity.normalized_name,
                    entity.kind
                ],
            )?;
            let entity_id: String = conn.query_row(
                "SELECT id FROM entities WHERE normalized_name = ?1",
                params![entity.normalized_name],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO mentions (memory_id, entity_id, weight) VALUES (?1, ?2, 1.0)",
                params![memory.id.as_str(), entity_id],
            )?;
        }

        if let Some(session_id) = &memory.session_id {
            conn.execute(
                "INSERT INTO sessions (session_id, started_at) VALUES (?1, ?2)
                 ON CONFLICT(session_id) DO NOTHING",
                params![session_id, memory.created_at.timestamp_millis()],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO belongs_to (memory_id, session_id) VALUES (?1, ?2)",
                params![memory.id.as_str(), session_id],
            )?;
        }
        Ok(())
    }

    /// Fetches a memory by id.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn get(&self, id: &MemoryId) -> Result<Option<Memory>> {
        self.db.with_read("get", |conn| {
            conn.query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id.as_str()],
                memory_from_row,
            )
            .optional()
        })
    }

    /// Finds a live memory by `(content_hash, user_id)`.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn find_live_by_hash(
        &self,
        content_hash: &str,
        user_id: Option<&str>,
    ) -> Result<Option<MemoryId>> {
        let now_ms = Utc::now().timestamp_millis();
        self.db
            .with_read("find_live_by_hash", |conn| {
                conn.query_row(
                    "SELECT id FROM memories
                     WHERE content_hash = ?1 AND user_id IS ?2
                       AND (valid_to IS NULL OR valid_to > ?3)
                     ORDER BY created_at DESC LIMIT 1",
                    params![content_hash, user_id, now_ms],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .map(|found| found.map(MemoryId::new))
    }

    /// Re-learn bookkeeping on an existing memory: bumps `access_count`,
    /// refreshes `accessed_at`, and raises `importance` by 0.05 (clipped).
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn bump_duplicate(&self, id: &MemoryId, now: DateTime<Utc>) -> Result<()> {
        self.db.with_write("bump_duplicate", |conn| {
            conn.execute(
                "UPDATE memories
                 SET access_count = access_count + 1,
                     accessed_at = ?2,
                     importance = MIN(1.0, importance + 0.05)
                 WHERE id = ?1",
                params![id.as_str(), now.timestamp_millis()],
            )?;
            Ok(())
        })
    }

    /// Appends filter predicates and their parameters.
    fn push_filters(
        filters: &RecallFilters,
        sql: &mut String,
        bound: &mut Vec<Box<dyn ToSql>>,
    ) {
        if let Some(user_id) = &filters.user_id {
            sql.push_str(" AND user_id = ?");
            bound.push(Box::new(user_id.clone()));
        }
        if let Some(session_id) = &filters.session_id {
            sql.push_str(" AND session_id = ?");
            bound.push(Box::new(session_id.clone()));
        }
        if let Some(memory_type) = filters.memory_type {
            sql.push_str(" AND memory_type = ?");
            bound.push(Box::new(memory_type.as_str().to_string()));
        }
    }

    /// Queries live memories overlapping a keyword set.
    ///
    /// Returned score is the matched fraction of the query keywords; callers
    /// re-rank with their own weighting.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    #[instrument(skip(self, keywords, filters), fields(keywords = keywords.len(), limit))]
    pub fn query_by_keywords(
        &self,
        keywords: &[String],
        limit: usize,
        filters: &RecallFilters,
    ) -> Result<Vec<(Memory, f64)>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let now_ms = Utc::now().timestamp_millis();
        let placeholders = vec!["?"; keywords.len()].join(", ");

        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS}, COUNT(mk.keyword) AS matched
             FROM memories JOIN memory_keywords mk ON mk.memory_id = memories.id
             WHERE mk.keyword IN ({placeholders})
               AND (valid_to IS NULL OR valid_to > ?)"
        );
        let mut bound: Vec<Box<dyn ToSql>> = keywords
            .iter()
            .map(|k| Box::new(k.clone()) as Box<dyn ToSql>)
            .collect();
        bound.push(Box::new(now_ms));
        Self::push_filters(filters, &mut sql, &mut bound);
        sql.push_str(" GROUP BY memories.id ORDER BY matched DESC, created_at DESC, id ASC LIMIT ?");
        bound.push(Box::new(limit as i64));

        let total = keywords.len() as f64;
        self.db.with_read("query_by_keywords", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(&refs[..], |row| {
                let memory = memory_from_row(row)?;
                let matched: i64 = row.get("matched")?;
                Ok((memory, matched as f64 / total))
            })?;
            rows.collect()
        })
    }

    /// Queries live memories mentioning any of the given entities.
    ///
    /// Entity names are matched on their normalised form; the score is the
    /// fraction of query entities each memory mentions.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    #[instrument(skip(self, entities, filters), fields(entities = entities.len(), limit))]
    pub fn query_by_entities(
        &self,
        entities: &[String],
        limit: usize,
        filters: &RecallFilters,
    ) -> Result<Vec<(Memory, f64)>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let now_ms = Utc::now().timestamp_millis();
        let normalized: Vec<String> = entities
            .iter()
            .map(|e| EntityRef::new(e.clone(), "name").normalized_name)
            .collect();
        let placeholders = vec!["?"; normalized.len()].join(", ");

        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS}, COUNT(DISTINCT e.normalized_name) AS matched
             FROM memories
             JOIN mentions ON mentions.memory_id = memories.id
             JOIN entities e ON e.id = mentions.entity_id
             WHERE e.normalized_name IN ({placeholders})
               AND (valid_to IS NULL OR valid_to > ?)"
        );
        let mut bound: Vec<Box<dyn ToSql>> = normalized
            .iter()
            .map(|e| Box::new(e.clone()) as Box<dyn ToSql>)
            .collect();
        bound.push(Box::new(now_ms));
        Self::push_filters(filters, &mut sql, &mut bound);
        sql.push_str(" GROUP BY memories.id ORDER BY matched DESC, created_at DESC, id ASC LIMIT ?");
        bound.push(Box::new(limit as i64));

        let total = normalized.len() as f64;
        self.db.with_read("query_by_entities", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(&refs[..], |row| {
                let memory = memory_from_row(row)?;
                let matched: i64 = row.get("matched")?;
                Ok((memory, matched as f64 / total))
            })?;
            rows.collect()
        })
    }

    /// Lists live memories ordered by creation time, newest first.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn query_recent(&self, limit: usize, filters: &RecallFilters) -> Result<Vec<Memory>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE (valid_to IS NULL OR valid_to > ?)"
        );
        let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(now_ms)];
        Self::push_filters(filters, &mut sql, &mut bound);
        sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");
        bound.push(Box::new(limit as i64));

        self.db.with_read("query_recent", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(&refs[..], memory_from_row)?;
            rows.collect()
        })
    }

    /// Access bookkeeping after recall returned a result.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn update_access(&self, ids: &[MemoryId], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now_ms = now.timestamp_millis();
        self.db.with_write("update_access", |conn| {
            for id in ids {
                conn.execute(
                    "UPDATE memories
                     SET access_count = access_count + 1, accessed_at = ?2
                     WHERE id = ?1",
                    params![id.as_str(), now_ms],
                )?;
            }
            Ok(())
        })
    }

    /// Records a typed relation between two memories.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn relate(
        &self,
        from: &MemoryId,
        to: &MemoryId,
        kind: RelationKind,
        similarity: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db.with_write("relate", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO relates_to (from_id, to_id, kind, similarity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![from.as_str(), to.as_str(), kind.as_str(), similarity, now.timestamp_millis()],
            )?;
            Ok(())
        })
    }

    /// Deletes a memory; edges cascade. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn delete(&self, id: &MemoryId) -> Result<bool> {
        let deleted = self.db.with_write("delete", |conn| {
            conn.execute("DELETE FROM memories WHERE id = ?1", params![id.as_str()])
        })?;
        Ok(deleted > 0)
    }

    /// Deletes expired memories and prunes orphaned session and entity
    /// nodes. Returns the number of memories reclaimed.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        let swept = self.db.with_write("sweep_expired", |conn| {
            let swept = conn.execute(
                "DELETE FROM memories WHERE valid_to IS NOT NULL AND valid_to <= ?1",
                params![now_ms],
            )?;
            conn.execute(
                "DELETE FROM sessions WHERE session_id NOT IN (SELECT session_id FROM belongs_to)",
                [],
            )?;
            conn.execute(
                "DELETE FROM entities WHERE id NOT IN (SELECT entity_id FROM mentions)",
                [],
            )?;
            Ok(swept)
        })?;
        if swept > 0 {
            tracing::info!(swept, "ttl sweep reclaimed expired memories");
            metrics::counter!("store_swept_total").increment(swept as u64);
        }
        Ok(swept)
    }

    /// Aggregate counters over live memories.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn stats(&self, current_user: Option<&str>, detailed: bool) -> Result<StoreStats> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let day_ago_ms = (now - Duration::hours(24)).timestamp_millis();
        let database_size_bytes = self.db.size_bytes();

        self.db.with_read("stats", move |conn| {
            let live = "(valid_to IS NULL OR valid_to > ?1)";
            let memory_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM memories WHERE {live}"),
                params![now_ms],
                |row| row.get(0),
            )?;

            let mut by_type = HashMap::new();
            let mut stmt = conn.prepare(&format!(
                "SELECT memory_type, COUNT(*) FROM memories WHERE {live} GROUP BY memory_type"
            ))?;
            let rows = stmt.query_map(params![now_ms], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (ty, count) = row?;
                by_type.insert(ty, count as u64);
            }

            let recent_memories: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM memories WHERE {live} AND created_at >= ?2"),
                params![now_ms, day_ago_ms],
                |row| row.get(0),
            )?;

            let user_stats = if detailed {
                let mut stmt = conn.prepare(&format!(
                    "SELECT DISTINCT user_id FROM memories
                     WHERE {live} AND user_id IS NOT NULL ORDER BY user_id"
                ))?;
                let users: Vec<String> = stmt
                    .query_map(params![now_ms], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                Some(UserStats {
                    total_users: users.len() as u64,
                    users,
                    current_user: current_user.map(ToString::to_string),
                })
            } else {
                None
            };

            Ok(StoreStats {
                memory_count: memory_count as u64,
                by_type,
                database_size_bytes,
                recent_memories: recent_memories as u64,
                user_stats,
            })
        })
    }

    /// Logs a warning when the engine file exceeds the configured threshold.
    fn warn_if_over_size(&self) {
        if self.max_size_bytes > 0 {
            let size = self.db.size_bytes();
            if size > self.max_size_bytes {
                tracing::warn!(
                    size_bytes = size,
                    threshold_bytes = self.max_size_bytes,
                    "database size exceeds storage.max_size_mb"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::models::SourceType;
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir) -> MemoryStore {
        MemoryStore::open(&tmp.path().join("memorydb"), &MemoryConfig::default()).expect("open")
    }

    fn sample_memory(content: &str, memory_type: MemoryType) -> Memory {
        let mut memory = Memory::new(content, memory_type, Utc::now());
        memory.source_type = SourceType::Api;
        memory.keywords = crate::classify::extract_keywords(content, &[], 16);
        memory.entities = crate::classify::extract_entity_names(content);
        memory
    }

    fn refs_for(memory: &Memory) -> Vec<EntityRef> {
        memory
            .entities
            .iter()
            .map(|e| EntityRef::new(e.clone(), "name"))
            .collect()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let memory = sample_memory("Team uses PostgreSQL 14", MemoryType::Preference);

        let id = store.put(&memory, &refs_for(&memory), false).expect("put");
        let fetched = store.get(&id).expect("get").expect("present");
        assert_eq!(fetched.content, memory.content);
        assert_eq!(fetched.memory_type, MemoryType::Preference);
        assert_eq!(fetched.content_hash, memory.content_hash);
        assert!(fetched.entities.contains(&"PostgreSQL".to_string()));
    }

    #[test]
    fn test_put_conflict_without_upsert() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let first = sample_memory("Team uses PostgreSQL 14", MemoryType::Preference);
        store.put(&first, &[], false).expect("first put");

        // Same normalised content, different formatting: same hash.
        let second = sample_memory("team uses postgresql 14", MemoryType::Preference);
        let err = store.put(&second, &[], false);
        assert!(matches!(err, Err(Error::Conflict { existing }) if existing == first.id));
    }

    #[test]
    fn test_bump_duplicate() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let memory = sample_memory("Team uses PostgreSQL 14", MemoryType::Preference);
        let id = store.put(&memory, &[], false).expect("put");

        store.bump_duplicate(&id, Utc::now()).expect("bump");
        store.bump_duplicate(&id, Utc::now()).expect("bump again");

        let bumped = store.get(&id).expect("get").expect("present");
        assert_eq!(bumped.access_count, 2);
        assert!(bumped.importance > memory.importance);
        assert!(bumped.accessed_at >= bumped.created_at);
    }

    #[test]
    fn test_query_by_keywords_scores_fraction() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let redis = sample_memory("Project uses Redis for caching layers", MemoryType::Semantic);
        let queue = sample_memory("Background queue drains learn tasks", MemoryType::Semantic);
        store.put(&redis, &refs_for(&redis), false).expect("put redis");
        store.put(&queue, &refs_for(&queue), false).expect("put queue");

        let hits = store
            .query_by_keywords(
                &["redis".to_string(), "layer".to_string()],
                10,
                &RecallFilters::default(),
            )
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, redis.id);
        assert!((hits[0].1 - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_query_by_entities() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let memory = sample_memory("Prefer FastAPI over Flask for new services", MemoryType::Preference);
        store.put(&memory, &refs_for(&memory), false).expect("put");

        let hits = store
            .query_by_entities(&["fastapi".to_string()], 10, &RecallFilters::default())
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, memory.id);
    }

    #[test]
    fn test_filters_scope_queries() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let mut alice = sample_memory("deploy scripts live in infra repo", MemoryType::Semantic);
        alice.user_id = Some("alice".to_string());
        let mut bob = sample_memory("deploy pipeline runs on merge", MemoryType::Semantic);
        bob.user_id = Some("bob".to_string());
        store.put(&alice, &[], false).expect("put alice");
        store.put(&bob, &[], false).expect("put bob");

        let filters = RecallFilters {
            user_id: Some("alice".to_string()),
            ..RecallFilters::default()
        };
        let hits = store
            .query_by_keywords(&["deploy".to_string()], 10, &filters)
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_sweep_expired_prunes_graph() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);

        // A sensory memory created 7 hours ago is past its 6-hour retention.
        let created = Utc::now() - Duration::hours(7);
        let mut stale = Memory::new("build feels slow today", MemoryType::Sensory, created);
        stale.session_id = Some("s-old".to_string());
        stale.keywords = vec!["build".to_string(), "slow".to_string()];
        store.put(&stale, &[EntityRef::new("BuildBot", "name")], false).expect("put stale");

        let fresh = sample_memory("Team uses PostgreSQL 14", MemoryType::Preference);
        store.put(&fresh, &[], false).expect("put fresh");

        let swept = store.sweep_expired(Utc::now()).expect("sweep");
        assert_eq!(swept, 1);
        assert!(store.get(&stale.id).expect("get").is_none());
        assert!(store.get(&fresh.id).expect("get").is_some());

        // Orphaned session and entity nodes are pruned with the memory.
        let hits = store
            .query_by_keywords(&["build".to_string()], 10, &RecallFilters::default())
            .expect("query");
        assert!(hits.is_empty());
    }

    #[test]
    fn test_expired_memories_invisible_to_queries() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let created = Utc::now() - Duration::hours(7);
        let mut stale = Memory::new("transient working note about redis", MemoryType::Sensory, created);
        stale.keywords = vec!["redis".to_string()];
        store.put(&stale, &[], false).expect("put");

        // Not swept yet, but already expired: every query must exclude it.
        let hits = store
            .query_by_keywords(&["redis".to_string()], 10, &RecallFilters::default())
            .expect("query");
        assert!(hits.is_empty());
        assert!(store.query_recent(10, &RecallFilters::default()).expect("recent").is_empty());
        assert_eq!(
            store.find_live_by_hash(&stale.content_hash, None).expect("hash"),
            None
        );
    }

    #[test]
    fn test_delete_and_relate() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let a = sample_memory("old decision to use flask", MemoryType::Episodic);
        let b = sample_memory("new decision to use fastapi framework", MemoryType::Episodic);
        store.put(&a, &[], false).expect("put a");
        store.put(&b, &[], false).expect("put b");

        store
            .relate(&b.id, &a.id, RelationKind::Supersedes, Some(0.7), Utc::now())
            .expect("relate");

        assert!(store.delete(&a.id).expect("delete"));
        assert!(!store.delete(&a.id).expect("delete again"));
        assert!(store.get(&b.id).expect("get").is_some());
    }

    #[test]
    fn test_stats() {
        let tmp = TempDir::new().expect("tempdir");
        let store = open_store(&tmp);
        let mut m1 = sample_memory("Team uses PostgreSQL 14", MemoryType::Preference);
        m1.user_id = Some("alice".to_string());
        let m2 = sample_memory("currently tweaking recall ranking", MemoryType::Working);
        store.put(&m1, &[], false).expect("put 1");
        store.put(&m2, &[], false).expect("put 2");

        let stats = store.stats(Some("alice"), true).expect("stats");
        assert_eq!(stats.memory_count, 2);
        assert_eq!(stats.by_type.get("preference"), Some(&1));
        assert_eq!(stats.by_type.get("working"), Some(&1));
        assert_eq!(stats.recent_memories, 2);
        let users = stats.user_stats.expect("detailed");
        assert_eq!(users.total_users, 1);
        assert_eq!(users.current_user.as_deref(), Some("alice"));
    }
}
