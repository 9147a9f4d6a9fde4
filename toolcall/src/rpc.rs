//! JSON-RPC 2.0 framing and multi-shape response parsing.
//!
//! Tool servers answer the same request in several shapes:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"result":{...}}                      bare JSON
//! event: message\ndata: {"jsonrpc":"2.0","id":1,"result":...}  SSE stream
//! "{\"jsonrpc\":\"2.0\",...}"                                   JSON string holding the envelope
//! ```
//!
//! and inside a successful envelope the payload is often double-encoded as
//! `result.content[0].text`. [`parse_body`] recovers the envelope and
//! [`into_tool_output`] separates the two error channels and unwraps the
//! payload.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CallResult, ToolCallError};

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Maximum characters of a raw body quoted in error messages.
const BODY_PREVIEW_CHARS: usize = 200;

/// Outgoing JSON-RPC request or notification.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    /// Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id: None,
        }
    }

    /// `initialize` request announcing this client.
    pub fn initialize(id: u64, client_name: &str, client_version: &str) -> Self {
        Self::new(
            id,
            "initialize",
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": client_name, "version": client_version },
            }),
        )
    }

    /// `tools/call` request for one tool invocation.
    pub fn tool_call(id: u64, tool_name: &str, arguments: Value) -> Self {
        Self::new(
            id,
            "tools/call",
            serde_json::json!({ "name": tool_name, "arguments": arguments }),
        )
    }
}

/// Recover the JSON-RPC envelope from a raw response body.
///
/// Tries, in order: a bare JSON object, SSE `data:` frames, and a JSON
/// string literal that itself holds the envelope.
pub fn parse_body(body: &str) -> Result<Value, String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err("empty response body".to_string());
    }

    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    if let Some(v) = parse_sse(trimmed) {
        return Ok(v);
    }

    if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(trimmed) {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(inner.trim()) {
            return Ok(v);
        }
    }

    Err(format!("unparsable response body: {}", preview(trimmed)))
}

/// Extract the JSON payload from an SSE stream.
///
/// Multi-line `data:` fields within one event are joined with newlines. The
/// last event carrying `result` or `error` wins; otherwise the last JSON
/// object seen.
fn parse_sse(body: &str) -> Option<Value> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }

    let parsed: Vec<Value> = events
        .iter()
        .filter_map(|e| serde_json::from_str::<Value>(e.trim()).ok())
        .filter(Value::is_object)
        .collect();

    parsed
        .iter()
        .rev()
        .find(|v| v.get("result").is_some() || v.get("error").is_some())
        .or_else(|| parsed.last())
        .cloned()
}

/// Turn a parsed envelope into the tool's payload or an error.
///
/// A JSON-RPC `error` member is a transport/protocol failure; `isError:true`
/// on the result is a tool failure whose message concatenates every
/// `content[].text` fragment.
pub fn into_tool_output(server: &str, tool: &str, envelope: Value) -> CallResult<Value> {
    if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
        return Err(ToolCallError::transport(server, describe_rpc_error(err)));
    }

    let result = if envelope.get("result").is_some() {
        envelope["result"].clone()
    } else if envelope.get("jsonrpc").is_some() {
        return Err(ToolCallError::transport(
            server,
            "response envelope has neither result nor error",
        ));
    } else {
        // Some servers answer with the bare result object.
        envelope
    };

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let fragments = text_fragments(&result);
        let message = if fragments.is_empty() {
            result.to_string()
        } else {
            fragments.join("\n")
        };
        return Err(ToolCallError::tool(tool, message));
    }

    Ok(unwrap_payload(result))
}

/// All `content[].text` strings of a tool result, in order.
pub fn text_fragments(result: &Value) -> Vec<&str> {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn unwrap_payload(result: Value) -> Value {
    if let Some(structured) = result.get("structuredContent").filter(|v| v.is_object()) {
        return structured.clone();
    }

    let unwrapped = {
        let fragments = text_fragments(&result);
        fragments
            .first()
            .map(|first| match serde_json::from_str::<Value>(first.trim()) {
                Ok(v) if v.is_object() || v.is_array() => v,
                // Doubly stringified JSON.
                Ok(Value::String(inner)) => match serde_json::from_str::<Value>(inner.trim()) {
                    Ok(v) if v.is_object() || v.is_array() => v,
                    _ => Value::String(inner),
                },
                _ => Value::String(fragments.join("\n")),
            })
    };

    unwrapped.unwrap_or(result)
}

fn describe_rpc_error(err: &Value) -> String {
    let code = err.get("code").and_then(Value::as_i64);
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    let mut out = match code {
        Some(code) => format!("JSON-RPC error {code}: {message}"),
        None => format!("JSON-RPC error: {message}"),
    };
    if let Some(data) = err.get("data").filter(|d| !d.is_null()) {
        out.push_str(&format!(" ({})", preview(&data.to_string())));
    }
    out
}

/// Truncate a body for inclusion in an error message.
pub fn preview(body: &str) -> String {
    if body.chars().count() <= BODY_PREVIEW_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({"key": "UI-42", "self": "https://jira.local/rest/api/2/issue/10042"})
    }

    #[test]
    fn test_request_serialization() {
        let req = RpcRequest::tool_call(7, "jira_search", json!({"jql": "project = UI"}));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["method"], "tools/call");
        assert_eq!(v["id"], 7);
        assert_eq!(v["params"]["name"], "jira_search");
        assert_eq!(v["params"]["arguments"]["jql"], "project = UI");
    }

    #[test]
    fn test_notification_has_no_id() {
        let req = RpcRequest::notification("notifications/initialized", json!({}));
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("id").is_none());
    }

    #[test]
    fn test_three_shapes_parse_to_same_payload() {
        let plain = json!({"jsonrpc": "2.0", "id": 1, "result": payload()}).to_string();
        let sse = format!("event: message\ndata: {plain}\n\n");
        let double = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": payload().to_string()}]}
        })
        .to_string();

        let outputs: Vec<Value> = [plain, sse, double]
            .iter()
            .map(|body| into_tool_output("jira", "jira_create_issue", parse_body(body).unwrap()).unwrap())
            .collect();

        assert_eq!(outputs[0], payload());
        assert_eq!(outputs[1], payload());
        assert_eq!(outputs[2], payload());
    }

    #[test]
    fn test_sse_prefers_result_event() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"ok\":true}}\n\n";
        let v = parse_body(body).unwrap();
        assert_eq!(v["id"], 3);
    }

    #[test]
    fn test_sse_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\r\ndata: \"id\":1,\"result\":{}}\r\n\r\n";
        let v = parse_body(body).unwrap();
        assert_eq!(v["id"], 1);
    }

    #[test]
    fn test_string_wrapped_envelope() {
        let inner = json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}}).to_string();
        let body = serde_json::to_string(&inner).unwrap();
        let v = parse_body(&body).unwrap();
        assert_eq!(v["result"]["a"], 1);
    }

    #[test]
    fn test_unparsable_body() {
        let err = parse_body("<html>Bad Gateway</html>").unwrap_err();
        assert!(err.contains("unparsable"));
        assert!(parse_body("   ").is_err());
    }

    #[test]
    fn test_rpc_error_is_transport() {
        let env = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "Invalid params"}});
        let err = into_tool_output("jira", "jira_search", env).unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("-32602"));
    }

    #[test]
    fn test_is_error_concatenates_fragments() {
        let env = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "isError": true,
                "content": [
                    {"type": "text", "text": "Page already exists"},
                    {"type": "text", "text": "title: Design Spec"}
                ]
            }
        });
        let err = into_tool_output("wiki", "confluence_create_page", env).unwrap_err();
        assert!(err.is_tool());
        let msg = err.to_string();
        assert!(msg.contains("Page already exists"));
        assert!(msg.contains("title: Design Spec"));
    }

    #[test]
    fn test_plain_text_content() {
        let env = json!({"result": {"content": [{"type": "text", "text": "Branch created"}]}});
        let v = into_tool_output("git", "git_create_branch", env).unwrap();
        assert_eq!(v, Value::String("Branch created".into()));
    }

    #[test]
    fn test_structured_content_preferred() {
        let env = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "content": [{"type": "text", "text": "summary"}],
                "structuredContent": {"id": "123"}
            }
        });
        let v = into_tool_output("wiki", "confluence_get_page", env).unwrap();
        assert_eq!(v["id"], "123");
    }

    #[test]
    fn test_envelope_without_result_or_error() {
        let env = json!({"jsonrpc": "2.0", "id": 1});
        assert!(into_tool_output("jira", "t", env).unwrap_err().is_transport());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), BODY_PREVIEW_CHARS + 3);
    }
}
