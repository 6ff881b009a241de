//! JSON-RPC 2.0 message types for the tool-server protocol

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants;
use crate::error::ToolError;

/// JSON-RPC request
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(id: i64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC notification (no id)
#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub(crate) fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Any incoming message: response, notification or server request
#[derive(Debug, Deserialize)]
pub(crate) struct Message {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    pub(crate) method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Method not found
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

impl Message {
    /// Whether this is the response to request `id`
    pub(crate) fn answers(&self, id: i64) -> bool {
        self.method.is_none() && self.id.as_ref().and_then(Value::as_i64) == Some(id)
    }

    pub(crate) fn into_result(self) -> Result<Value, ToolError> {
        if let Some(error) = self.error {
            return Err(ToolError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Parse one payload (line or SSE frame); `None` for non-JSON noise
pub(crate) fn parse_message(text: &str) -> Option<Message> {
    serde_json::from_str(text.trim()).ok()
}

pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": constants::tools::PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": constants::tools::CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Names from a `tools/list` or `resources/list` page, plus the next cursor
pub(crate) fn parse_names(result: &Value, key: &str) -> Result<(Vec<String>, Option<String>), ToolError> {
    let items = result
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Protocol(format!("response has no '{}' array", key)))?;

    let names = items
        .iter()
        .filter_map(|item| {
            item.get("name")
                .or_else(|| item.get("uri"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();
    let cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((names, cursor))
}
