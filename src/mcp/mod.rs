//! Line-delimited JSON-RPC 2.0 server over standard streams.
//!
//! Exposes the fixed tool surface (`enhance`, `learn`, `recall`, `stats`)
//! plus the protocol methods `initialize`, `tools/list`, `tools/call`,
//! `ping`, and `shutdown` to a single host agent per process.

mod protocol;
mod server;
mod stdio;
mod tools;

pub use protocol::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};
pub use server::{Handled, McpServer};
pub use stdio::run;
pub use tools::{TOOL_NAMES, ToolContext, ToolOutcome, tool_definitions};
