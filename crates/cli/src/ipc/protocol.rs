//! Wire format between `bsync` and the daemon
//!
//! One JSON object per line. Every message is self-describing:
//! - Request: `{"jsonrpc":"2.0","id":7,"method":"ping","params":{}}`
//! - Response: `{"jsonrpc":"2.0","id":7,"result":{...}}` or with `error`
//! - Notification: `{"jsonrpc":"2.0","method":"watch_event","params":{...}}`

use bsync_core::WatchEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names
pub mod methods {
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
    pub const WATCH_START: &str = "watch_start";
    pub const WATCH_STOP: &str = "watch_stop";
    pub const WATCH_STATUS: &str = "watch_status";
    pub const UPDATE_RUN: &str = "update_run";
    pub const STATUS_GET: &str = "status_get";

    /// Server -> client lifecycle event stream
    pub const WATCH_EVENT: &str = "watch_event";
}

/// Error codes carried in `error.code`
pub mod codes {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const WATCH_ALREADY_RUNNING: i32 = -32001;
    pub const GENERATE_FAILED: i32 = -32002;
    pub const WATCH_NOT_RUNNING: i32 = -32003;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Reply to a request; exactly one of `result` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    /// `None` only when the request id could not be read
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the result or the error
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Wrap a lifecycle event for the `watch_event` stream
    pub fn watch_event(event: &WatchEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::new(methods::WATCH_EVENT, serde_json::to_value(event)?))
    }

    /// Decode a `watch_event` payload
    pub fn as_watch_event(&self) -> Option<WatchEvent> {
        if self.method != methods::WATCH_EVENT {
            return None;
        }
        serde_json::from_value(self.params.clone()).ok()
    }
}

/// Structured error returned by a handler
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_request(reason: &str) -> Self {
        Self::new(codes::INVALID_REQUEST, format!("invalid request: {reason}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("unknown method '{method}'"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// Any message that can appear on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// Loose shape used to tell message kinds apart
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Why a line could not be read as a message
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    Invalid(&'static str),
}

impl Message {
    /// Classify one line from the wire
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let raw: RawMessage = serde_json::from_str(line)?;
        let jsonrpc = raw.jsonrpc.unwrap_or_else(|| JSONRPC_VERSION.to_string());

        let id = match raw.id {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .ok_or(DecodeError::Invalid("id must be an unsigned integer"))?,
            ),
        };

        match (raw.method, id) {
            (Some(method), Some(id)) => Ok(Message::Request(Request {
                jsonrpc,
                id,
                method,
                params: raw.params,
            })),
            (Some(method), None) => Ok(Message::Notification(Notification {
                jsonrpc,
                method,
                params: raw.params,
            })),
            (None, id) => {
                if raw.error.is_none() && raw.result.is_none() && id.is_none() {
                    return Err(DecodeError::Invalid("neither method nor id"));
                }
                let result = match raw.error {
                    Some(_) => None,
                    None => Some(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Message::Response(Response {
                    jsonrpc,
                    id,
                    result,
                    error: raw.error,
                }))
            }
        }
    }
}

/// `ping` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub pong: bool,
    pub pid: u32,
    pub version: String,
    pub uptime_ms: u64,
}

/// `shutdown` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownResult {
    pub stopping: bool,
}

/// `watch_start` params
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchStartParams {
    /// Subtrees to watch, relative to the root (empty = whole root)
    #[serde(default)]
    pub paths: Vec<String>,
    /// Debounce override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    /// Language filter override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

/// `watch_start` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchStartResult {
    pub root: String,
    pub paths: Vec<String>,
    pub debounce_ms: u64,
    pub languages: Vec<String>,
    pub watched_dirs: usize,
}

/// `watch_stop` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchStopResult {
    pub stopped: bool,
    pub updates: u64,
    pub errors: u64,
}

/// `watch_status` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchStatusResult {
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub root: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub watched_dirs: usize,
    pub pending_dirs: usize,
    pub debounce_ms: u64,
    pub updates: u64,
    pub errors: u64,
    pub uptime_ms: u64,
    /// Unix milliseconds of the last successful pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_ms: Option<u64>,
}

/// `update_run` params
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRunParams {
    #[serde(default)]
    pub incremental: bool,
}

/// `update_run` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRunResult {
    pub updated: Vec<String>,
    pub elapsed_ms: u64,
}

/// `status_get` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusGetResult {
    pub stale: bool,
    pub dirs: Vec<String>,
    pub tracked_files: usize,
}
