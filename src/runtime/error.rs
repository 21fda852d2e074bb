//! Runtime error types.

use thiserror::Error;

use crate::jupyter::JupyterError;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the execution controller before streaming begins.
///
/// Failures that happen after an execution has started streaming are not
/// represented here; those are delivered to the client as `error` events.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The request named a language the daemon does not dispatch.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// Context listing/deletion was called for a non-kernel language.
    #[error("unsupported language context operation: {0}")]
    UnsupportedLanguage(String),

    /// No kernel context is registered under the given session id.
    #[error("context not found")]
    ContextNotFound,

    /// The kernel context is already running an execute.
    #[error("session is busy")]
    SessionBusy,

    /// No registered kernelspec matches the requested language.
    #[error("no kernel specs found")]
    NoKernelSpec,

    /// The daemon was started without a Jupyter server endpoint.
    #[error("language runtime server not configured, please check your image runtime")]
    NotConfigured,

    /// No command context is registered under the given session id.
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// Output seek was requested for a foreground command.
    #[error("command {0} is not running in background")]
    NotBackground(String),

    /// A terminated process still responded to a signal probe.
    #[error("process {0} might still be running")]
    StillRunning(i32),

    /// Interrupt targeted an id with neither a kernel nor a command context.
    #[error("no such session")]
    NoSuchSession,

    #[error(transparent)]
    Jupyter(#[from] JupyterError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
