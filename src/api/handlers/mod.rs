//! Request handlers, grouped by surface.

pub mod code;
pub mod command;
pub mod files;
pub mod metrics;
pub mod misc;

use axum::response::Response;
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use super::sse;
use super::state::AppState;
use crate::runtime::{EventSink, ExecuteRequest};

/// Shared execute path: run controller setup, spawn the execution, and hand
/// back the SSE response. Setup failures surface as JSON errors before any
/// frame is written; everything after that flows through the stream.
pub(crate) async fn run_streaming(
    state: &AppState,
    request: ExecuteRequest,
) -> Result<Response, ApiError> {
    let (sink, rx) = EventSink::channel();
    let cancel = CancellationToken::new();

    let task = state
        .controller
        .execute(request, sink, cancel.child_token())
        .await?;
    tokio::spawn(task.run());

    sse::sse_response(rx, state.grace_shutdown, cancel.drop_guard())
}

/// Shared interrupt path for `/code` and `/command`.
pub(crate) async fn interrupt_session(state: &AppState, id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::missing_query("missing query parameter 'id'"));
    }
    state
        .controller
        .interrupt(id)
        .await
        .map_err(|err| ApiError::runtime(format!("error interrupting code context. {err}")))
}
