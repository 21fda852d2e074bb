//! Liveness.

use axum::Json;
use serde_json::{json, Value};

/// `GET /ping`
pub async fn ping() -> Json<Value> {
    Json(json!({"message": "pong"}))
}
