//! Shell command execution, status, and background log reads.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::code::InterruptQuery;
use super::{interrupt_session, run_streaming};
use crate::api::error::{ApiError, ErrorCode};
use crate::api::state::AppState;
use crate::runtime::{ExecuteRequest, Language};

/// Response header carrying the next read cursor for background output.
pub const TAIL_CURSOR_HEADER: &str = "EXECD-COMMANDS-TAIL-CURSOR";

#[derive(Debug, Deserialize)]
pub struct RunCommandRequest {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub background: bool,
}

/// `POST /command`: run a shell command. Foreground streams per line;
/// background detaches after registering the session.
pub async fn run_command(
    State(state): State<AppState>,
    body: Result<Json<RunCommandRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|err| {
        ApiError::invalid_request(format!(
            "error parsing request, MAYBE invalid body format. {err}"
        ))
    })?;
    if request.command.is_empty() {
        return Err(ApiError::invalid_request(
            "missing required field 'command'",
        ));
    }

    let language = if request.background {
        Language::BackgroundCommand
    } else {
        Language::Command
    };
    let execute = ExecuteRequest::new(language, request.command).with_cwd(request.cwd);

    run_streaming(&state, execute).await
}

/// `DELETE /command?id=<session>`
pub async fn interrupt_command(
    State(state): State<AppState>,
    Query(query): Query<InterruptQuery>,
) -> Result<Response, ApiError> {
    interrupt_session(&state, &query.id).await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Serialize)]
pub struct CommandStatusResponse {
    pub id: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// `GET /command/status/{id}`
pub async fn command_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandStatusResponse>, ApiError> {
    let status = state
        .controller
        .get_command_status(&id)
        .await
        .map_err(|err| {
            ApiError::new(StatusCode::NOT_FOUND, ErrorCode::InvalidRequest, err.to_string())
        })?;

    Ok(Json(CommandStatusResponse {
        id: status.session,
        running: status.running,
        exit_code: status.exit_code,
        error: status.error,
        content: status.content,
        started_at: status.started_at,
        finished_at: status.finished_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    #[serde(default)]
    pub cursor: String,
}

/// `GET /command/{id}/logs?cursor=<n>`: accumulated output as plain text,
/// with the next cursor in a response header. A malformed cursor reads from
/// the start.
pub async fn background_command_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CursorQuery>,
) -> Result<Response, ApiError> {
    let cursor = query.cursor.parse::<i64>().unwrap_or(0);

    let (output, next_cursor) = state
        .controller
        .seek_background_command_output(&id, cursor)
        .await
        .map_err(|err| ApiError::invalid_request(err.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE.as_str(),
                "text/plain; charset=utf-8".to_string(),
            ),
            (TAIL_CURSOR_HEADER, next_cursor.to_string()),
        ],
        output,
    )
        .into_response())
}
