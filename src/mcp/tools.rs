//! The fixed tool surface: `enhance`, `learn`, `recall`, `stats`.
//!
//! Tool arguments are validated into typed structs at the RPC boundary;
//! malformed argument objects are protocol errors (`-32602`), while
//! pipeline failures surface as a normal result object with
//! `status: "error"` so a host agent never sees a tool call blow up.

use crate::models::{
    LearnRequest, MemoryType, RecallFilters, RecallOptions, RecallResult, RecallStrategy,
    SourceType,
};
use crate::queue::{LearnQueue, MAX_WAIT, TaskStatus};
use crate::recall::RecallEngine;
use crate::storage::MemoryStore;
use crate::models::LearnOutcome;
use crate::Error;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tool names in `tools/list` order.
pub const TOOL_NAMES: [&str; 4] = ["enhance", "learn", "recall", "stats"];

/// Everything a tool handler needs.
pub struct ToolContext {
    /// Recall engine (also serves enhance).
    pub engine: Arc<RecallEngine>,
    /// The learn queue.
    pub queue: Arc<LearnQueue>,
    /// Store handle for stats.
    pub store: MemoryStore,
    /// Resolved identity for stats and learn defaults.
    pub current_user: Option<String>,
}

/// A tool result plus work deferred until after the response is written.
pub struct ToolOutcome {
    /// The result object sent to the client.
    pub payload: Value,
    /// Recall result whose access counts are bumped post-response.
    pub deferred_access: Option<RecallResult>,
}

impl ToolOutcome {
    fn plain(payload: Value) -> Self {
        Self {
            payload,
            deferred_access: None,
        }
    }
}

/// Scope filter arguments shared by enhance and recall.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterArgs {
    user_id: Option<String>,
    session_id: Option<String>,
    memory_type: Option<String>,
}

impl FilterArgs {
    fn into_filters(self) -> Result<RecallFilters, String> {
        let memory_type = match self.memory_type {
            Some(raw) => Some(
                MemoryType::parse(&raw).ok_or_else(|| format!("unknown memory_type: {raw}"))?,
            ),
            None => None,
        };
        Ok(RecallFilters {
            user_id: self.user_id,
            session_id: self.session_id,
            memory_type,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EnhanceArgs {
    prompt: String,
    #[serde(default = "default_max_memories")]
    max_memories: usize,
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default)]
    filters: FilterArgs,
}

#[derive(Debug, Deserialize)]
struct RecallArgs {
    query: String,
    #[serde(default = "default_max_memories")]
    max_memories: usize,
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default)]
    filters: FilterArgs,
}

#[derive(Debug, Deserialize)]
struct LearnArgs {
    content: String,
    #[serde(default = "default_source")]
    source: String,
    session_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(default = "default_wait_ms")]
    wait_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StatsArgs {
    #[serde(default)]
    detailed: bool,
}

fn default_max_memories() -> usize {
    5
}
fn default_strategy() -> String {
    "auto".to_string()
}
fn default_source() -> String {
    "api".to_string()
}
fn default_wait_ms() -> u64 {
    5_000
}

/// Builds recall options from string arguments.
fn build_options(
    max_memories: usize,
    strategy: &str,
    filters: FilterArgs,
) -> Result<RecallOptions, String> {
    let strategy =
        RecallStrategy::parse(strategy).ok_or_else(|| format!("unknown strategy: {strategy}"))?;
    Ok(RecallOptions {
        max_memories: max_memories.clamp(1, 100),
        strategy,
        filters: filters.into_filters()?,
    })
}

/// An error result object (tool-level failure, not a protocol error).
fn error_payload(error: &Error) -> Value {
    json!({
        "status": "error",
        "kind": error.kind(),
        "message": error.to_string(),
    })
}

/// Serialises selected memories for a result object.
fn memory_payloads(result: &RecallResult) -> Vec<Value> {
    result
        .memories
        .iter()
        .map(|scored| {
            json!({
                "id": scored.memory.id.as_str(),
                "content": scored.memory.content,
                "memory_type": scored.memory.memory_type.as_str(),
                "score": scored.final_score,
            })
        })
        .collect()
}

/// Dispatches a `tools/call` by name.
///
/// # Errors
///
/// Returns a message suitable for `-32602` when the argument object fails
/// validation; every other failure is folded into the payload.
pub async fn call_tool(
    context: &ToolContext,
    name: &str,
    arguments: Value,
) -> Result<ToolOutcome, String> {
    match name {
        "enhance" => enhance(context, arguments),
        "learn" => learn(context, arguments).await,
        "recall" => recall(context, arguments),
        "stats" => stats(context, arguments),
        other => Err(format!("unknown tool: {other}")),
    }
}

fn enhance(context: &ToolContext, arguments: Value) -> Result<ToolOutcome, String> {
    let args: EnhanceArgs = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
    let opts = build_options(args.max_memories, &args.strategy, args.filters)?;

    match context.engine.enhance(&args.prompt, &opts) {
        Ok(enhanced) => {
            let recall = RecallResult {
                memories: enhanced.memories.clone(),
                strategy_used: String::new(),
                confidence: enhanced.confidence,
                elapsed_ms: enhanced.elapsed_ms,
            };
            Ok(ToolOutcome {
                payload: json!({
                    "status": "ok",
                    "enhanced_prompt": enhanced.enhanced_prompt,
                    "memories": memory_payloads(&recall),
                    "confidence": enhanced.confidence,
                    "elapsed_ms": enhanced.elapsed_ms,
                }),
                deferred_access: Some(recall),
            })
        },
        // Hooks must never break the host: hand the prompt back untouched.
        Err(e) => Ok(ToolOutcome::plain(json!({
            "status": "error",
            "kind": e.kind(),
            "enhanced_prompt": args.prompt,
            "memories": [],
            "message": e.to_string(),
        }))),
    }
}

fn recall(context: &ToolContext, arguments: Value) -> Result<ToolOutcome, String> {
    let args: RecallArgs = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
    let opts = build_options(args.max_memories, &args.strategy, args.filters)?;

    match context.engine.recall(&args.query, &opts) {
        Ok(result) => Ok(ToolOutcome {
            payload: json!({
                "status": "ok",
                "memories": memory_payloads(&result),
                "strategy_used": result.strategy_used,
                "confidence": result.confidence,
                "elapsed_ms": result.elapsed_ms,
            }),
            deferred_access: Some(result),
        }),
        Err(e) => Ok(ToolOutcome::plain(error_payload(&e))),
    }
}

async fn learn(context: &ToolContext, arguments: Value) -> Result<ToolOutcome, String> {
    let args: LearnArgs = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
    let source = SourceType::parse(&args.source).ok_or_else(|| format!("unknown source: {}", args.source))?;
    let start = Instant::now();

    let request = LearnRequest {
        content: args.content,
        source,
        session_id: args.session_id,
        agent_id: None,
        user_id: context.current_user.clone(),
        metadata: args.metadata,
        memory_type: None,
        created_at: None,
    };

    let task_id = match context.queue.enqueue(request) {
        Ok(task_id) => task_id,
        Err(e) => return Ok(ToolOutcome::plain(error_payload(&e))),
    };

    let elapsed = |start: Instant| u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    if args.wait_ms == 0 {
        return Ok(ToolOutcome::plain(json!({
            "status": "queued",
            "task_id": task_id,
            "elapsed_ms": elapsed(start),
        })));
    }

    let wait = Duration::from_millis(args.wait_ms).min(MAX_WAIT);
    let status = context.queue.await_task(&task_id, wait).await;
    let payload = match status {
        TaskStatus::Done(LearnOutcome::Stored { memory_id })
        | TaskStatus::Done(LearnOutcome::Updated { memory_id }) => json!({
            "status": "ok",
            "task_id": task_id,
            "memory_id": memory_id.as_str(),
            "elapsed_ms": elapsed(start),
        }),
        TaskStatus::Done(LearnOutcome::SkippedSecret { .. }) => json!({
            "status": "ok",
            "task_id": task_id,
            "skipped": "secret",
            "elapsed_ms": elapsed(start),
        }),
        TaskStatus::Done(LearnOutcome::SkippedTooShort { length, min }) => json!({
            "status": "ok",
            "task_id": task_id,
            "skipped": "too_short",
            "length": length,
            "min": min,
            "elapsed_ms": elapsed(start),
        }),
        TaskStatus::Failed(message) => json!({
            "status": "error",
            "kind": "internal",
            "task_id": task_id,
            "message": message,
            "elapsed_ms": elapsed(start),
        }),
        TaskStatus::Cancelled => json!({
            "status": "error",
            "kind": "cancelled",
            "task_id": task_id,
            "elapsed_ms": elapsed(start),
        }),
        // Still in flight after the wait budget; the task keeps running.
        TaskStatus::Pending => json!({
            "status": "timeout",
            "task_id": task_id,
            "elapsed_ms": elapsed(start),
        }),
    };
    Ok(ToolOutcome::plain(payload))
}

fn stats(context: &ToolContext, arguments: Value) -> Result<ToolOutcome, String> {
    let args: StatsArgs = if arguments.is_null() {
        StatsArgs::default()
    } else {
        serde_json::from_value(arguments).map_err(|e| e.to_string())?
    };

    match context.store.stats(context.current_user.as_deref(), args.detailed) {
        Ok(stats) => {
            let mut payload = serde_json::to_value(&stats).unwrap_or_else(|_| json!({}));
            if let Some(object) = payload.as_object_mut() {
                object.insert("status".to_string(), json!("ok"));
            }
            Ok(ToolOutcome::plain(payload))
        },
        Err(e) => Ok(ToolOutcome::plain(error_payload(&e))),
    }
}

/// Tool descriptors for `tools/list`.
#[must_use]
pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "enhance",
            "description": "Rewrite a user prompt by prepending the most relevant project memories as context.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "The prompt to enhance" },
                    "max_memories": { "type": "integer", "default": 5 },
                    "strategy": { "type": "string", "enum": ["auto", "keyword", "entity", "temporal"], "default": "auto" },
                    "filters": {
                        "type": "object",
                        "properties": {
                            "user_id": { "type": "string" },
                            "session_id": { "type": "string" },
                            "memory_type": { "type": "string" }
                        }
                    }
                },
                "required": ["prompt"]
            }
        },
        {
            "name": "learn",
            "description": "Store an observation asynchronously. Returns immediately with a task id; pass wait_ms to wait for the stored memory id.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "The observation to remember" },
                    "source": { "type": "string", "default": "api" },
                    "session_id": { "type": "string" },
                    "metadata": { "type": "object" },
                    "wait_ms": { "type": "integer", "default": 5000, "maximum": 30000 }
                },
                "required": ["content"]
            }
        },
        {
            "name": "recall",
            "description": "Return the memories most relevant to a query.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Free-text query" },
                    "max_memories": { "type": "integer", "default": 5 },
                    "strategy": { "type": "string", "enum": ["auto", "keyword", "entity", "temporal"], "default": "auto" },
                    "filters": {
                        "type": "object",
                        "properties": {
                            "user_id": { "type": "string" },
                            "session_id": { "type": "string" },
                            "memory_type": { "type": "string" }
                        }
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "stats",
            "description": "Memory store statistics: counts by type, database size, recent activity.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "detailed": { "type": "boolean", "default": false }
                }
            }
        }
    ])
}
