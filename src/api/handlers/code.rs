//! Code execution and context CRUD.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{interrupt_session, run_streaming};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::runtime::{CodeContext, CreateContextRequest, ExecuteRequest, Language};

#[derive(Debug, Default, Deserialize)]
pub struct CodeContextRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub cwd: String,
}

#[derive(Debug, Deserialize)]
pub struct RunCodeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub context: CodeContextRef,
}

fn bad_body(err: JsonRejection) -> ApiError {
    ApiError::invalid_request(format!(
        "error parsing request, MAYBE invalid body format. {err}"
    ))
}

/// `POST /code`: run code in an existing or default context and stream the
/// output. An empty language means a foreground shell command.
pub async fn run_code(
    State(state): State<AppState>,
    body: Result<Json<RunCodeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(bad_body)?;
    if request.code.is_empty() {
        return Err(ApiError::invalid_request("missing required field 'code'"));
    }

    let language = if request.context.language.is_empty() {
        Language::Command
    } else {
        request.context.language.parse::<Language>()?
    };

    let execute = ExecuteRequest::new(language, request.code)
        .with_context(request.context.id)
        .with_cwd(request.context.cwd);

    run_streaming(&state, execute).await
}

#[derive(Debug, Deserialize)]
pub struct InterruptQuery {
    #[serde(default)]
    pub id: String,
}

/// `DELETE /code?id=<session>`
pub async fn interrupt_code(
    State(state): State<AppState>,
    Query(query): Query<InterruptQuery>,
) -> Result<Response, ApiError> {
    interrupt_session(&state, &query.id).await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Serialize)]
pub struct CodeContextResponse {
    pub id: String,
    pub language: Language,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cwd: String,
}

/// `POST /code/context`
pub async fn create_context(
    State(state): State<AppState>,
    body: Result<Json<CreateContextRequest>, JsonRejection>,
) -> Result<Json<CodeContextResponse>, ApiError> {
    let Json(request) = body.map_err(bad_body)?;

    let id = state
        .controller
        .create_context(&request)
        .await
        .map_err(|err| ApiError::runtime(format!("error creating code context. {err}")))?;

    Ok(Json(CodeContextResponse {
        id,
        language: request.language,
        cwd: request.cwd,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LanguageQuery {
    #[serde(default)]
    pub language: String,
}

/// `GET /code/contexts?language=<l>`: blank language lists everything.
pub async fn list_contexts(
    State(state): State<AppState>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<Vec<CodeContext>>, ApiError> {
    let contexts = state
        .controller
        .list_contexts(&query.language)
        .await
        .map_err(|err| ApiError::runtime(err.to_string()))?;
    Ok(Json(contexts))
}

/// `GET /code/contexts/{id}`
pub async fn get_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CodeContext>, ApiError> {
    Ok(Json(state.controller.get_context(&id).await?))
}

/// `DELETE /code/contexts/{id}`
pub async fn delete_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.controller.delete_context(&id).await?;
    Ok(StatusCode::OK.into_response())
}

/// `DELETE /code/contexts?language=<l>`
pub async fn delete_language_contexts(
    State(state): State<AppState>,
    Query(query): Query<LanguageQuery>,
) -> Result<Response, ApiError> {
    if query.language.is_empty() {
        return Err(ApiError::missing_query(
            "missing query parameter 'language'",
        ));
    }

    let language = query
        .language
        .parse::<Language>()
        .map_err(|err| ApiError::runtime(err.to_string()))?;

    state
        .controller
        .delete_language_contexts(language)
        .await
        .map_err(|err| {
            ApiError::runtime(format!(
                "error deleting code context {}. {err}",
                query.language
            ))
        })?;

    Ok(StatusCode::OK.into_response())
}
