use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::ToolError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const RESOURCE_NOT_FOUND: i64 = -32002;

/// A decoded JSON-RPC request or notification (no `id`).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// `params` as an object; absent params count as empty.
    pub fn params_object(&self) -> Result<Map<String, Value>, RpcError> {
        match &self.params {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            _ => Err(RpcError::new(INVALID_PARAMS, "params must be an object")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        Self {
            code: err.kind.rpc_code(),
            data: Some(err.to_value()),
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// One line of output, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": self.id,
                "error": {
                    "code": INTERNAL_ERROR,
                    "message": format!("failed encoding response: {err}"),
                },
            })
            .to_string()
        })
    }
}

/// Decodes one input line. A failure carries the error response to send back.
pub fn parse_line(line: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(line).map_err(|err| {
        Response::err(
            Value::Null,
            RpcError::new(PARSE_ERROR, format!("parse error: {err}")),
        )
    })?;

    let invalid = |id: Value, message: &str| {
        Response::err(id, RpcError::new(INVALID_REQUEST, format!("invalid request: {message}")))
    };

    let is_batch = value.is_array();
    let Value::Object(mut object) = value else {
        let message = if is_batch {
            "batch requests are not supported"
        } else {
            "expected a JSON object"
        };
        return Err(invalid(Value::Null, message));
    };

    let id = match object.remove("id") {
        None => None,
        Some(id @ (Value::String(_) | Value::Number(_))) => Some(id),
        Some(_) => return Err(invalid(Value::Null, "id must be a string or a number")),
    };
    let reply_id = id.clone().unwrap_or(Value::Null);

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid(reply_id, "jsonrpc must be \"2.0\""));
    }
    let method = match object.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => return Err(invalid(reply_id, "method must be a non-empty string")),
    };
    let params = match object.remove("params") {
        None | Some(Value::Null) => Value::Null,
        Some(params @ (Value::Object(_) | Value::Array(_))) => params,
        Some(_) => return Err(invalid(reply_id, "params must be an object or an array")),
    };

    Ok(Request { id, method, params })
}
