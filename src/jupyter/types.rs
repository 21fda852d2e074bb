//! Wire types for the Jupyter REST API and the kernel message protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kernelspec listing returned by `GET /api/kernelspecs`.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelSpecs {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub kernelspecs: std::collections::HashMap<String, KernelSpecInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KernelSpecInfo {
    #[serde(default)]
    pub name: String,
    pub spec: KernelSpecDetail,
    #[serde(default)]
    pub resources: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KernelSpecDetail {
    #[serde(default)]
    pub argv: Vec<String>,
    pub display_name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub interrupt_mode: String,
}

/// A running kernel instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kernel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connections: i64,
    #[serde(default)]
    pub execution_state: String,
}

#[derive(Debug, Serialize)]
pub struct KernelStartRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KernelRestartResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub restarted: bool,
}

/// A Jupyter session binding a notebook path to a kernel.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    pub kernel: SessionKernel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionKernel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub execution_state: String,
}

#[derive(Debug, Serialize)]
pub struct SessionCreateRequest {
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub kernel: SessionKernelSpec,
}

/// Kernel selector for session creation: name to start fresh, id to reuse.
#[derive(Debug, Default, Serialize)]
pub struct SessionKernelSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SessionUpdateRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<SessionKernelSpec>,
}

/// Default Jupyter session type.
pub const SESSION_TYPE_NOTEBOOK: &str = "notebook";

/// Kernel message protocol version spoken on the websocket.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Message header on the kernel channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

/// Kernel channel envelope. Incoming messages may omit most fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub header: MessageHeader,
    #[serde(default)]
    pub parent_header: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub buffers: Vec<Value>,
    #[serde(default)]
    pub channel: String,
}

/// `execute_request` content.
#[derive(Debug, Serialize)]
pub struct ExecuteRequestContent {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequestContent {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

/// `execute_reply` content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteReply {
    #[serde(default)]
    pub execution_count: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// `execute_result` content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteResult {
    #[serde(default)]
    pub execution_count: i64,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `stream` content.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamOutput {
    pub name: String,
    #[serde(default)]
    pub text: String,
}

pub const STREAM_STDOUT: &str = "stdout";
pub const STREAM_STDERR: &str = "stderr";

/// `status` content.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub execution_state: String,
}

pub const STATE_IDLE: &str = "idle";

/// `error` content, also reused for daemon-side execution failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ErrorOutput {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    pub fn with_traceback(mut self, traceback: Vec<String>) -> Self {
        self.traceback = traceback;
        self
    }
}

/// Authentication modes for the Jupyter server.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Token(String),
    Basic {
        username: String,
        password: String,
    },
}

impl Auth {
    pub fn token(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.is_empty() {
            Auth::None
        } else {
            Auth::Token(token)
        }
    }

    /// Token value for query-string auth on the websocket, if any.
    pub fn query_token(&self) -> Option<&str> {
        match self {
            Auth::Token(t) => Some(t.as_str()),
            _ => None,
        }
    }
}
