//! JSON-RPC server core: method dispatch over the tool surface.
//!
//! One request at a time; handler work stays on this task, with the learn
//! pipeline already isolated behind the queue. The dispatch is a typed
//! method enum rather than scattered string matching.

use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use super::tools::{ToolContext, call_tool, tool_definitions};
use crate::models::RecallResult;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Supported protocol methods.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Method {
    Initialize,
    Initialized,
    ListTools,
    CallTool,
    Ping,
    Shutdown,
    Unknown(String),
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "initialize" => Self::Initialize,
            "notifications/initialized" => Self::Initialized,
            "tools/list" => Self::ListTools,
            "tools/call" => Self::CallTool,
            "ping" => Self::Ping,
            "shutdown" => Self::Shutdown,
            unknown => Self::Unknown(unknown.to_string()),
        }
    }
}

/// Outcome of handling one request line.
pub struct Handled {
    /// Response to write, if the request was not a notification.
    pub response: Option<JsonRpcResponse>,
    /// Access bookkeeping deferred until after the response is written.
    pub deferred_access: Option<RecallResult>,
    /// True when the client asked for a graceful stop.
    pub shutdown: bool,
}

/// The JSON-RPC server state.
pub struct McpServer {
    context: ToolContext,
    initialized: bool,
}

impl McpServer {
    /// Creates a server over the tool context.
    #[must_use]
    pub const fn new(context: ToolContext) -> Self {
        Self {
            context,
            initialized: false,
        }
    }

    /// Returns the tool context (the stdio loop records deferred access
    /// through it).
    #[must_use]
    pub const fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Handles one request.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Handled {
        debug!(method = %request.method, "handling request");
        let method = Method::from(request.method.as_str());
        let is_notification = request.is_notification();
        let id = request.id.clone();

        // Everything except the handshake and ping requires initialize.
        if !self.initialized
            && !matches!(method, Method::Initialize | Method::Initialized | Method::Ping)
        {
            warn!(method = %request.method, "rejecting request before initialize");
            return Handled {
                response: Some(JsonRpcResponse::error(
                    id,
                    JsonRpcError::server_not_initialized(),
                )),
                deferred_access: None,
                shutdown: false,
            };
        }

        let mut deferred_access = None;
        let mut shutdown = false;
        let result: Result<Value, JsonRpcError> = match method {
            Method::Initialize => self.handle_initialize(request.params),
            Method::Initialized => {
                return Handled {
                    response: None,
                    deferred_access: None,
                    shutdown: false,
                };
            },
            Method::ListTools => Ok(json!({ "tools": tool_definitions() })),
            Method::CallTool => {
                match self.handle_tool_call(request.params).await {
                    Ok((payload, access)) => {
                        deferred_access = access;
                        Ok(payload)
                    },
                    Err(error) => Err(error),
                }
            },
            Method::Ping => Ok(json!({ "pong": true })),
            Method::Shutdown => {
                info!("shutdown requested");
                shutdown = true;
                Ok(json!({ "status": "ok" }))
            },
            Method::Unknown(name) => Err(JsonRpcError::method_not_found(&name)),
        };

        let response = if is_notification {
            None
        } else {
            Some(match result {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(error) => JsonRpcResponse::error(id, error),
            })
        };
        Handled {
            response,
            deferred_access,
            shutdown,
        }
    }

    /// `initialize`: negotiate and advertise the tool capability.
    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let client_version = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        // Use the client's version when it is older; newer clients get ours.
        let negotiated = if client_version < PROTOCOL_VERSION {
            client_version
        } else {
            PROTOCOL_VERSION
        };

        self.initialized = true;
        info!(protocol_version = negotiated, "session initialized");

        Ok(json!({
            "protocolVersion": negotiated,
            "serverInfo": {
                "name": "kuzu-memory",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": false },
            },
        }))
    }

    /// `tools/call`: validate the envelope, then dispatch.
    async fn handle_tool_call(
        &self,
        params: Option<Value>,
    ) -> Result<(Value, Option<RecallResult>), JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        metrics::counter!("rpc_tool_calls_total", "tool" => name.to_string()).increment(1);
        match call_tool(&self.context, name, arguments).await {
            Ok(outcome) => Ok((outcome.payload, outcome.deferred_access)),
            Err(message) => Err(JsonRpcError::invalid_params(&message)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::MemoryConfig;
    use crate::learner::Learner;
    use crate::queue::LearnQueue;
    use crate::recall::{RecallCaches, RecallEngine};
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server_with(tmp: &TempDir) -> McpServer {
        let config = MemoryConfig::default();
        let store = MemoryStore::open(&tmp.path().join("memorydb"), &config).unwrap();
        let caches = Arc::new(RecallCaches::new(64, Duration::from_secs(60)));
        let engine = Arc::new(RecallEngine::new(store.clone(), Arc::clone(&caches), &config));
        let learner = Arc::new(
            Learner::new(store.clone(), caches, &config, Some("tester".to_string())).unwrap(),
        );
        let queue = Arc::new(LearnQueue::start(learner, &config));
        McpServer::new(ToolContext {
            engine,
            queue,
            store,
            current_user: Some("tester".to_string()),
        })
    }

    fn request(method: &str, id: Option<i64>, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.map(Value::from),
            method: method.to_string(),
            params,
        }
    }

    async fn initialize(server: &mut McpServer) {
        let handled = server.handle_request(request("initialize", Some(1), None)).await;
        assert!(handled.response.unwrap().result.is_some());
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        let handled = server.handle_request(request("tools/list", Some(1), None)).await;
        let error = handled.response.unwrap().error.unwrap();
        assert_eq!(error.code, -32002);
    }

    #[tokio::test]
    async fn test_ping_before_initialize() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        let handled = server.handle_request(request("ping", Some(1), None)).await;
        let result = handled.response.unwrap().result.unwrap();
        assert_eq!(result, json!({ "pong": true }));
    }

    #[tokio::test]
    async fn test_tools_list_has_four_tools() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        let handled = server.handle_request(request("tools/list", Some(2), None)).await;
        let result = handled.response.unwrap().result.unwrap();
        let tools = result.get("tools").and_then(Value::as_array).unwrap();
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, ["enhance", "learn", "recall", "stats"]);
    }

    #[tokio::test]
    async fn test_learn_then_recall_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        let learn = request(
            "tools/call",
            Some(3),
            Some(json!({
                "name": "learn",
                "arguments": {
                    "content": "Team uses PostgreSQL 14 for the primary database",
                    "wait_ms": 5000
                }
            })),
        );
        let handled = server.handle_request(learn).await;
        let result = handled.response.unwrap().result.unwrap();
        assert_eq!(result.get("status"), Some(&json!("ok")));
        assert!(result.get("memory_id").is_some());

        let recall = request(
            "tools/call",
            Some(4),
            Some(json!({
                "name": "recall",
                "arguments": { "query": "postgresql" }
            })),
        );
        let handled = server.handle_request(recall).await;
        let result = handled.response.unwrap().result.unwrap();
        assert_eq!(result.get("status"), Some(&json!("ok")));
        let memories = result.get("memories").and_then(Value::as_array).unwrap();
        assert_eq!(memories.len(), 1);
        assert!(handled.deferred_access.is_some());
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        let handled = server.handle_request(request("bogus/method", Some(5), None)).await;
        assert_eq!(handled.response.unwrap().error.unwrap().code, -32601);

        let call = request(
            "tools/call",
            Some(6),
            Some(json!({ "name": "bogus", "arguments": {} })),
        );
        let handled = server.handle_request(call).await;
        assert_eq!(handled.response.unwrap().error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_invalid_tool_args_are_invalid_params() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        // recall without a query
        let call = request(
            "tools/call",
            Some(7),
            Some(json!({ "name": "recall", "arguments": { "max_memories": 3 } })),
        );
        let handled = server.handle_request(call).await;
        assert_eq!(handled.response.unwrap().error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        let notification = request("notifications/initialized", None, None);
        let handled = server.handle_request(notification).await;
        assert!(handled.response.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_flags_the_loop() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        let handled = server.handle_request(request("shutdown", Some(8), None)).await;
        assert!(handled.shutdown);
        assert_eq!(
            handled.response.unwrap().result.unwrap().get("status"),
            Some(&json!("ok"))
        );
    }

    #[tokio::test]
    async fn test_enhance_formats_context() {
        let tmp = TempDir::new().unwrap();
        let mut server = server_with(&tmp);
        initialize(&mut server).await;

        for content in [
            "Use asyncio for I/O bound work in the ingestion service",
            "Project uses Redis as the shared cache for session state",
        ] {
            let learn = request(
                "tools/call",
                Some(9),
                Some(json!({
                    "name": "learn",
                    "arguments": { "content": content, "wait_ms": 5000 }
                })),
            );
            let handled = server.handle_request(learn).await;
            let result = handled.response.unwrap().result.unwrap();
            assert_eq!(result.get("status"), Some(&json!("ok")));
        }

        let enhance = request(
            "tools/call",
            Some(10),
            Some(json!({
                "name": "enhance",
                "arguments": { "prompt": "How do I cache?", "max_memories": 2 }
            })),
        );
        let handled = server.handle_request(enhance).await;
        let result = handled.response.unwrap().result.unwrap();
        let prompt = result.get("enhanced_prompt").and_then(Value::as_str).unwrap();
        assert!(prompt.starts_with("## Relevant Context:\n1. "));
        assert!(prompt.ends_with("## User Message:\nHow do I cache?"));
    }
}
