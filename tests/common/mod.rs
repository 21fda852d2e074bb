//! Test utilities and common setup.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use serde_json::Value;

use execd::api::{create_router, AppState};
use execd::runtime::Controller;

/// Router wired to an unconfigured controller: shell and filesystem paths
/// work, Jupyter/SQL paths fail with setup errors.
pub fn test_app() -> Router {
    test_app_with_token("")
}

pub fn test_app_with_token(token: &str) -> Router {
    let controller = Arc::new(Controller::new("", ""));
    let state = AppState::new(controller, token.to_string(), Duration::from_millis(100));
    create_router(state)
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn response_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

pub async fn response_json(response: Response) -> Value {
    let body = response_body(response).await;
    serde_json::from_slice(&body).unwrap()
}

/// Split an SSE body into its JSON frames.
pub async fn response_frames(response: Response) -> Vec<Value> {
    let body = response_body(response).await;
    let text = String::from_utf8(body).unwrap();
    text.split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| serde_json::from_str(chunk).unwrap())
        .collect()
}

/// Frame types in order, with keepalive pings filtered out.
pub fn frame_types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| frame["type"].as_str().unwrap().to_string())
        .filter(|kind| kind != "ping")
        .collect()
}
