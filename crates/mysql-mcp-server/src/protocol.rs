//! JSON-RPC 2.0 message shapes carried over the stdio transport.
//!
//! One request or notification per line. A notification (no `id`) never
//! receives a response, matching the JSON-RPC 2.0 spec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Either an incoming request (expects a response) or a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[allow(dead_code)]
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Whether this message expects a response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A successful or failed response, always carrying the request's `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Build a success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// `-32700 Parse error`: the line was not valid JSON.
    #[must_use]
    pub fn parse_error(detail: &str) -> Self {
        Self {
            code: -32700,
            message: "parse error".to_string(),
            data: Some(Value::String(detail.to_string())),
        }
    }

    /// `-32601 Method not found`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    /// `-32602 Invalid params`.
    #[must_use]
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "invalid params".to_string(),
            data: Some(Value::String(detail.to_string())),
        }
    }

    /// `-32000 Server error`: a sanitised application-level failure. `data`
    /// carries the sanitiser's `client_response()` shape.
    #[must_use]
    #[allow(dead_code)]
    pub fn server_error(sanitized: Value) -> Self {
        Self {
            code: -32000,
            message: "server error".to_string(),
            data: Some(sanitized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_id_is_a_notification() {
        let request: Request = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"tools/list","params":{}}"#,
        )
        .expect("valid json");
        assert!(request.is_notification());
    }

    #[test]
    fn request_with_id_is_not_a_notification() {
        let request: Request = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{}}"#,
        )
        .expect("valid json");
        assert!(!request.is_notification());
    }

    #[test]
    fn success_response_omits_error_field() {
        let response = Response::success(Value::from(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_value(&response).expect("serialize");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_response_omits_result_field() {
        let response = Response::failure(Value::from(1), RpcError::method_not_found("bogus"));
        let json = serde_json::to_value(&response).expect("serialize");
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32601);
    }
}
