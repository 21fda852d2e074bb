//! Jupyter server client: REST for sessions and kernels, WebSocket for the
//! execute protocol.

mod execute;
mod rest;
mod types;

pub use execute::{ExecutionUpdate, KernelChannels};
pub use rest::Client;
pub use types::{
    Auth, ErrorOutput, ExecuteReply, ExecuteRequestContent, ExecuteResult, Kernel,
    KernelSpecDetail, KernelSpecInfo, KernelSpecs, MessageHeader, Session, SessionKernel,
    StatusUpdate, StreamOutput, WireMessage, PROTOCOL_VERSION, SESSION_TYPE_NOTEBOOK, STATE_IDLE,
    STREAM_STDERR, STREAM_STDOUT,
};

use thiserror::Error;

/// Errors talking to the Jupyter server.
#[derive(Debug, Error)]
pub enum JupyterError {
    #[error("jupyter request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("jupyter server returned error status code: {0}")]
    ServerStatus(u16),

    #[error("invalid jupyter server url: {0}")]
    InvalidUrl(String),

    #[error("kernel websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("kernel message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The kernel created for a new session never showed up in the listing.
    #[error("kernel not found")]
    KernelNotFound,
}
