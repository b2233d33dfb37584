//! Newline-delimited JSON-RPC 2.0 framing used on the runtime's stdio.

use serde::Serialize;
use serde_json::Value;

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

const VERSION: &str = "2.0";

/// JSON-RPC error object as carried on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// A decoded line from the runtime.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response {
        id: u64,
        result: Result<Value, RpcErrorObject>,
    },
    /// The runtime is asking us to do something and expects a reply.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Fire-and-forget message from the runtime.
    Notification { method: String, params: Value },
}

#[derive(Serialize)]
struct OutgoingRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct OutgoingResponse<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorObject>,
}

/// Encode a request line (without the trailing newline).
pub fn encode_request(id: u64, method: &str, params: &Value) -> String {
    to_line(&OutgoingRequest {
        jsonrpc: VERSION,
        id,
        method,
        params,
    })
}

/// Encode a success reply to a runtime-initiated request.
pub fn encode_result(id: &Value, result: Value) -> String {
    to_line(&OutgoingResponse {
        jsonrpc: VERSION,
        id,
        result: Some(result),
        error: None,
    })
}

/// Encode an error reply to a runtime-initiated request.
pub fn encode_error(id: &Value, code: i64, message: impl Into<String>) -> String {
    to_line(&OutgoingResponse {
        jsonrpc: VERSION,
        id,
        result: None,
        error: Some(RpcErrorObject {
            code,
            message: message.into(),
        }),
    })
}

pub fn method_not_found(id: &Value, method: &str) -> String {
    encode_error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
}

fn to_line<T: Serialize>(msg: &T) -> String {
    // Serializing these shapes cannot fail: every key is a string.
    serde_json::to_string(msg).unwrap_or_default()
}

/// Decode one line from the runtime.
pub fn parse_incoming(line: &str) -> Result<Incoming, RpcErrorObject> {
    let val: Value = serde_json::from_str(line).map_err(|e| RpcErrorObject {
        code: PARSE_ERROR,
        message: format!("Parse error: {e}"),
    })?;
    let Value::Object(mut obj) = val else {
        return Err(invalid("message is not an object"));
    };

    let params = obj.remove("params").unwrap_or(Value::Null);
    match obj.remove("method") {
        Some(Value::String(method)) => match obj.remove("id") {
            Some(id) if !id.is_null() => Ok(Incoming::Request { id, method, params }),
            _ => Ok(Incoming::Notification { method, params }),
        },
        Some(_) => Err(invalid("method must be a string")),
        None => {
            let id = obj
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid("response without a numeric id"))?;
            let result = match obj.remove("error") {
                Some(err) if !err.is_null() => Err(RpcErrorObject {
                    code: err.get("code").and_then(Value::as_i64).unwrap_or(INTERNAL_ERROR),
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                }),
                _ => Ok(obj.remove("result").unwrap_or(Value::Null)),
            };
            Ok(Incoming::Response { id, result })
        }
    }
}

fn invalid(message: &str) -> RpcErrorObject {
    RpcErrorObject {
        code: INVALID_REQUEST,
        message: message.to_string(),
    }
}

/// Extract a required string param.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}
