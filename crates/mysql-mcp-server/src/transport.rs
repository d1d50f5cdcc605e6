//! Stdio transport: one JSON-RPC 2.0 message per line in, one per line out.
//!
//! The read loop never blocks on a slow tool call — each decoded request is
//! handed to its own `tokio::spawn`'d task, and all responses funnel through
//! a single writer task so concurrent handlers can never interleave partial
//! lines on stdout.

use std::sync::Arc;

use mysql_mcp_core::{SanitizedError, SecureClient};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::protocol::{Request, Response, RpcError};
use crate::tools;

/// Read requests from stdin until EOF, dispatch each concurrently, and
/// write responses to stdout as they complete. Returns once stdin closes.
pub async fn run(client: Arc<SecureClient>) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let client = Arc::clone(&client);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_line(&client, &line).await {
                let _ = tx.send(response);
            }
        });
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

async fn handle_line(client: &SecureClient, line: &str) -> Option<String> {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            let response = Response::failure(Value::Null, RpcError::parse_error(&e.to_string()));
            return Some(encode(&response));
        }
    };

    if request.is_notification() {
        return None;
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let response = match dispatch_method(client, &request).await {
        Ok(result) => Response::success(id, result),
        Err(error) => Response::failure(id, error),
    };
    Some(encode(&response))
}

async fn dispatch_method(client: &SecureClient, request: &Request) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "mysql-mcp-server", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": {} },
        })),
        "tools/list" => Ok(tools::list_payload()),
        "tools/call" => {
            let name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::invalid_params("missing tool name"))?
                .to_string();
            let arguments = request.params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            match tools::dispatch(client, &name, &arguments).await {
                Ok(payload) => Ok(success_content(&payload)),
                Err(sanitized) => Ok(error_content(&sanitized)),
            }
        }
        other => Err(RpcError::method_not_found(other)),
    }
}

fn success_content(payload: &Value) -> Value {
    let text = serde_json::to_string(payload).unwrap_or_default();
    json!({ "content": [{ "type": "text", "text": text }], "isError": false })
}

fn error_content(sanitized: &SanitizedError) -> Value {
    json!({ "content": [{ "type": "text", "text": sanitized.message.clone() }], "isError": true })
}

fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal encoding error"}}"#.to_string()
    })
}
