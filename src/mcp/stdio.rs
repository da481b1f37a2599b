//! stdio transport: line-delimited JSON-RPC over stdin/stdout.
//!
//! A simple read-parse-dispatch cycle on one task. stdout carries only
//! protocol frames (logging goes to stderr or a file); responses are
//! written and flushed before any deferred access bookkeeping runs, so the
//! client never waits on bookkeeping.

use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use super::server::McpServer;
use crate::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, warn};

/// Fallback frame when even error serialisation fails.
const INTERNAL_ERROR_FRAME: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// Runs the server loop until stdin closes or a shutdown request arrives.
///
/// # Errors
///
/// Returns an error only for unrecoverable stream failures; per-request
/// errors are answered in-band.
pub async fn run(mut server: McpServer) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, stopping server loop");
                break;
            },
            Err(e) => {
                error!(error = %e, "failed to read from stdin");
                break;
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "failed to parse request line");
                let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                write_response(&mut stdout, &response).await;
                continue;
            },
        };

        let handled = server.handle_request(request).await;
        if let Some(response) = handled.response {
            write_response(&mut stdout, &response).await;
        }
        // Access bookkeeping strictly after the response hit the wire.
        if let Some(access) = handled.deferred_access {
            if let Err(e) = server.context().engine.record_access(&access) {
                warn!(error = %e, "failed to record access counts");
            }
        }
        if handled.shutdown {
            break;
        }
    }

    Ok(())
}

/// Writes one response line, falling back to a minimal error frame so the
/// client never hangs on a missing reply.
async fn write_response(stdout: &mut tokio::io::Stdout, response: &JsonRpcResponse) {
    let frame = serde_json::to_string(response).unwrap_or_else(|e| {
        error!(error = %e, "failed to serialise response");
        INTERNAL_ERROR_FRAME.to_string()
    });
    debug!(bytes = frame.len(), "sending response");
    if let Err(e) = stdout.write_all(frame.as_bytes()).await {
        error!(error = %e, "failed to write response");
        return;
    }
    let _ = stdout.write_all(b"\n").await;
    let _ = stdout.flush().await;
}
