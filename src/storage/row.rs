//! Row ↔ `Memory` mapping for the embedded store.

use crate::models::{Memory, MemoryId, MemoryType, SourceType};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use std::collections::HashMap;

/// Column list every memory SELECT uses, in `memory_from_row` order.
pub const MEMORY_COLUMNS: &str = "id, content, content_hash, memory_type, source_type, \
     session_id, agent_id, user_id, importance, confidence, access_count, \
     created_at, accessed_at, valid_from, valid_to, metadata, keywords, entities";

/// Converts an epoch-milliseconds column into a UTC instant.
fn timestamp_from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

/// Parses a JSON string-array column, treating NULL as empty.
fn string_list_from_json(idx: usize, raw: Option<String>) -> rusqlite::Result<Vec<String>> {
    raw.map_or(Ok(Vec::new()), |json| {
        serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
        })
    })
}

/// Builds a [`Memory`] from a row selected with [`MEMORY_COLUMNS`].
pub fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let content_hash: String = row.get(2)?;
    let memory_type_str: String = row.get(3)?;
    let source_type_str: String = row.get(4)?;
    let session_id: Option<String> = row.get(5)?;
    let agent_id: Option<String> = row.get(6)?;
    let user_id: Option<String> = row.get(7)?;
    let importance: f64 = row.get(8)?;
    let confidence: f64 = row.get(9)?;
    let access_count: i64 = row.get(10)?;
    let created_at: i64 = row.get(11)?;
    let accessed_at: i64 = row.get(12)?;
    let valid_from: i64 = row.get(13)?;
    let valid_to: Option<i64> = row.get(14)?;
    let metadata_json: Option<String> = row.get(15)?;
    let keywords_json: Option<String> = row.get(16)?;
    let entities_json: Option<String> = row.get(17)?;

    let memory_type = MemoryType::parse(&memory_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown memory type: {memory_type_str}").into(),
        )
    })?;
    let source_type = SourceType::parse(&source_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown source type: {source_type_str}").into(),
        )
    })?;

    let metadata: HashMap<String, serde_json::Value> =
        metadata_json.map_or(Ok(HashMap::new()), |json| {
            serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(15, Type::Text, e.to_string().into())
            })
        })?;

    Ok(Memory {
        id: MemoryId::new(id),
        content,
        content_hash,
        memory_type,
        source_type,
        session_id,
        agent_id,
        user_id,
        importance,
        confidence,
        access_count: u64::try_from(access_count).unwrap_or(0),
        created_at: timestamp_from_millis(11, created_at)?,
        accessed_at: timestamp_from_millis(12, accessed_at)?,
        valid_from: timestamp_from_millis(13, valid_from)?,
        valid_to: valid_to.map(|ms| timestamp_from_millis(14, ms)).transpose()?,
        metadata,
        keywords: string_list_from_json(16, keywords_json)?,
        entities: string_list_from_json(17, entities_json)?,
    })
}
