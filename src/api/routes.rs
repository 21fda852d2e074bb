//! Route definitions and request middleware.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use log::info;
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::handlers::{code, command, files, metrics, misc};
use super::state::{AppState, ACCESS_TOKEN_HEADER};

/// Build the daemon router.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.clone();

    Router::new()
        .route("/ping", get(misc::ping))
        // code execution
        .route("/code", post(code::run_code).delete(code::interrupt_code))
        .route("/code/context", post(code::create_context))
        .route(
            "/code/contexts",
            get(code::list_contexts).delete(code::delete_language_contexts),
        )
        .route(
            "/code/contexts/{id}",
            get(code::get_context).delete(code::delete_context),
        )
        // shell commands
        .route(
            "/command",
            post(command::run_command).delete(command::interrupt_command),
        )
        .route("/command/status/{id}", get(command::command_status))
        .route("/command/{id}/logs", get(command::background_command_logs))
        // filesystem
        .route("/files", delete(files::remove_files))
        .route("/files/info", get(files::files_info))
        .route("/files/mv", post(files::rename_files))
        .route("/files/permissions", post(files::chmod_files))
        .route("/files/search", get(files::search_files))
        .route("/files/replace", post(files::replace_content))
        .route("/files/upload", post(files::upload_files))
        .route("/files/download", get(files::download_file))
        .route(
            "/directories",
            post(files::make_dirs).delete(files::remove_dirs),
        )
        // host metrics
        .route("/metrics", get(metrics::get_metrics))
        .route("/metrics/watch", get(metrics::watch_metrics))
        .layer(middleware::from_fn_with_state(
            auth_state,
            access_token_middleware,
        ))
        .layer(middleware::from_fn(log_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn log_middleware(request: Request, next: Next) -> Response {
    info!("Requested: {} - {}", request.method(), request.uri());
    next.run(request).await
}

/// Shared-token check. No token configured server-side means no check.
async fn access_token_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.access_token.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided != state.access_token {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": format!("Unauthorized: invalid or missing header {ACCESS_TOKEN_HEADER}"),
            })),
        )
            .into_response();
    }

    next.run(request).await
}
