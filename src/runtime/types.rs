//! Request, language and event types shared across the execution backends.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::error::RuntimeError;
use crate::jupyter::ErrorOutput;

/// Execution language routed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Command,
    #[serde(rename = "background-command")]
    BackgroundCommand,
    Bash,
    Python,
    Java,
    #[serde(rename = "javascript")]
    JavaScript,
    #[serde(rename = "typescript")]
    TypeScript,
    Go,
    Sql,
}

impl Language {
    /// Wire representation, which doubles as the Jupyter kernelspec language.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Command => "command",
            Language::BackgroundCommand => "background-command",
            Language::Bash => "bash",
            Language::Python => "python",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Sql => "sql",
        }
    }

    /// Whether the language executes on a Jupyter kernel.
    pub fn is_kernel(&self) -> bool {
        matches!(
            self,
            Language::Bash
                | Language::Python
                | Language::Java
                | Language::JavaScript
                | Language::TypeScript
                | Language::Go
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command" => Ok(Language::Command),
            "background-command" => Ok(Language::BackgroundCommand),
            "bash" => Ok(Language::Bash),
            "python" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "javascript" => Ok(Language::JavaScript),
            "typescript" => Ok(Language::TypeScript),
            "go" => Ok(Language::Go),
            "sql" => Ok(Language::Sql),
            other => Err(RuntimeError::UnknownLanguage(other.to_string())),
        }
    }
}

/// A single code/command execution request. Consumed once by the controller.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub language: Language,
    pub code: String,
    /// Existing context id; empty means the language default.
    pub context: String,
    /// Optional deadline for the whole execution.
    pub timeout: Option<Duration>,
    pub cwd: String,
    /// Extra environment overlaid on the daemon environment for children.
    pub envs: Vec<(String, String)>,
}

impl ExecuteRequest {
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
            context: String::new(),
            timeout: None,
            cwd: String::new(),
            envs: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Context creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContextRequest {
    pub language: Language,
    #[serde(default)]
    pub cwd: String,
}

/// Session metadata returned by context CRUD operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeContext {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub id: String,
    pub language: Language,
}

/// Events produced by the executors, drained in order by the SSE bridge.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    /// Execution bound to a session; always the first event of a run.
    Init { session: String },
    /// Kernel execution state transition ("busy", "idle", ...).
    Status { state: String },
    Stdout { text: String },
    Stderr { text: String },
    /// A result bundle with its execution counter.
    Result { data: Map<String, Value>, count: i64 },
    Error { error: ErrorOutput },
    /// Successful completion with wall-clock duration.
    Complete { elapsed: Duration },
}

/// Ordered, bounded event pipe from an executor to one client connection.
///
/// Sends silently become no-ops once the receiving side is gone, so executors
/// never fail just because the client disconnected mid-run.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl EventSink {
    pub const CHANNEL_CAPACITY: usize = 32;

    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving half.
    pub fn channel() -> (Self, mpsc::Receiver<ExecEvent>) {
        let (tx, rx) = mpsc::channel(Self::CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: ExecEvent) {
        let _ = self.tx.send(event).await;
    }

    pub async fn init(&self, session: impl Into<String>) {
        self.emit(ExecEvent::Init {
            session: session.into(),
        })
        .await;
    }

    pub async fn status(&self, state: impl Into<String>) {
        self.emit(ExecEvent::Status {
            state: state.into(),
        })
        .await;
    }

    pub async fn stdout(&self, text: impl Into<String>) {
        self.emit(ExecEvent::Stdout { text: text.into() }).await;
    }

    pub async fn stderr(&self, text: impl Into<String>) {
        self.emit(ExecEvent::Stderr { text: text.into() }).await;
    }

    pub async fn result(&self, data: Map<String, Value>, count: i64) {
        self.emit(ExecEvent::Result { data, count }).await;
    }

    pub async fn error(&self, error: ErrorOutput) {
        self.emit(ExecEvent::Error { error }).await;
    }

    pub async fn complete(&self, elapsed: Duration) {
        self.emit(ExecEvent::Complete { elapsed }).await;
    }
}
