//! HTTP surface tests driven through the real router.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::{
    frame_types, get_request, json_request, response_frames, response_json, test_app,
    test_app_with_token,
};

#[tokio::test]
async fn ping_works_without_authentication() {
    let app = test_app();
    let response = app.oneshot(get_request("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn access_token_guards_every_route() {
    let app = test_app_with_token("sesame");

    let response = app
        .clone()
        .oneshot(get_request("/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/ping")
                .header("x-access-token", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/ping")
                .header("x-access-token", "sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn run_code_requires_a_code_field() {
    let app = test_app();
    let response = app
        .oneshot(json_request(Method::POST, "/code", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["code"], "InvalidRequest");
}

#[tokio::test]
async fn run_code_rejects_unknown_languages() {
    let app = test_app();
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/code",
            json!({"code": "1+1", "context": {"language": "cobol"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response_json(response).await;
    assert_eq!(body["code"], "RuntimeError");
}

#[tokio::test]
async fn kernel_code_without_a_jupyter_server_is_a_setup_error() {
    let app = test_app();
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/code",
            json!({"code": "1+1", "context": {"language": "python"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response_json(response).await;
    assert_eq!(body["code"], "RuntimeError");
}

#[tokio::test]
async fn run_command_requires_a_command_field() {
    let app = test_app();
    let response = app
        .oneshot(json_request(Method::POST, "/command", json!({"cwd": "/tmp"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["code"], "InvalidRequest");
}

#[tokio::test]
async fn shell_command_streams_stdout_and_stderr() {
    let app = test_app();
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/command",
            json!({"command": "echo hello; echo err 1>&2"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let frames = response_frames(response).await;
    let types = frame_types(&frames);

    assert_eq!(types.first().map(String::as_str), Some("init"));
    assert_eq!(types.last().map(String::as_str), Some("execution_complete"));
    assert!(types.iter().any(|t| t == "stdout"));
    assert!(types.iter().any(|t| t == "stderr"));

    let stdout: Vec<&str> = frames
        .iter()
        .filter(|f| f["type"] == "stdout")
        .map(|f| f["text"].as_str().unwrap())
        .collect();
    assert_eq!(stdout, vec!["hello"]);

    let stderr: Vec<&str> = frames
        .iter()
        .filter(|f| f["type"] == "stderr")
        .map(|f| f["text"].as_str().unwrap())
        .collect();
    assert_eq!(stderr, vec!["err"]);

    // init carries the 32-char session id; every frame is stamped
    let init = &frames[0];
    assert_eq!(init["text"].as_str().unwrap().len(), 32);
    assert!(frames.iter().all(|f| f["timestamp"].as_i64().unwrap() > 0));
}

#[tokio::test]
async fn failing_command_ends_with_an_error_frame() {
    let app = test_app();
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/command",
            json!({"command": "echo before; exit 3"}),
        ))
        .await
        .unwrap();

    let frames = response_frames(response).await;
    let types = frame_types(&frames);

    assert_eq!(types.first().map(String::as_str), Some("init"));
    assert!(types.iter().any(|t| t == "stdout"));
    assert_eq!(types.last().map(String::as_str), Some("error"));
    assert!(!types.iter().any(|t| t == "execution_complete"));

    let error = frames.last().unwrap();
    assert_eq!(error["error"]["ename"], "CommandExecError");
    assert_eq!(error["error"]["evalue"], "3");
    assert!(error["error"]["traceback"].as_array().unwrap().len() > 0);
}

#[tokio::test]
async fn command_status_reflects_the_finished_run() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/command",
            json!({"command": "echo done"}),
        ))
        .await
        .unwrap();

    let frames = response_frames(response).await;
    let session = frames[0]["text"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request(&format!("/command/status/{session}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = response_json(response).await;
    assert_eq!(status["id"], session.as_str());
    assert_eq!(status["running"], false);
    assert_eq!(status["exit_code"], 0);
    assert_eq!(status["content"], "echo done");
    assert!(status["finished_at"].is_string());
}

#[tokio::test]
async fn command_status_of_unknown_session_is_404() {
    let app = test_app();
    let response = app
        .oneshot(get_request("/command/status/deadbeef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn background_command_output_is_polled_by_cursor() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/command",
            json!({"command": "printf 'line1\\nline2\\n'", "background": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let frames = response_frames(response).await;
    let types = frame_types(&frames);
    assert_eq!(types, vec!["init", "execution_complete"]);
    let session = frames[0]["text"].as_str().unwrap().to_string();

    // the detached spawn races the poll; retry until output lands
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let (body, cursor) = loop {
        let response = app
            .clone()
            .oneshot(get_request(&format!("/command/{session}/logs?cursor=0")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cursor: i64 = response.headers()["EXECD-COMMANDS-TAIL-CURSOR"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = common::response_body(response).await;
        if !body.is_empty() || std::time::Instant::now() > deadline {
            break (body, cursor);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    };

    assert_eq!(body, b"line1\nline2\n");
    assert!(cursor >= 12);

    // a second read from the returned cursor yields nothing new
    let response = app
        .oneshot(get_request(&format!(
            "/command/{session}/logs?cursor={cursor}"
        )))
        .await
        .unwrap();
    let next: i64 = response.headers()["EXECD-COMMANDS-TAIL-CURSOR"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = common::response_body(response).await;
    assert!(body.is_empty());
    assert!(next >= cursor);
}

#[tokio::test]
async fn foreground_logs_cannot_be_polled() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/command",
            json!({"command": "echo fg"}),
        ))
        .await
        .unwrap();
    let frames = response_frames(response).await;
    let session = frames[0]["text"].as_str().unwrap();

    let response = app
        .oneshot(get_request(&format!("/command/{session}/logs?cursor=0")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn interrupt_requires_an_id() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/command")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["code"], "MissingQuery");

    // unknown sessions are a runtime error, not a silent success
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/code?id=unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn context_listing_rejects_pseudo_languages() {
    let app = test_app();
    for language in ["command", "background-command", "sql"] {
        let response = app
            .clone()
            .oneshot(get_request(&format!("/code/contexts?language={language}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let response = app.oneshot(get_request("/code/contexts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_contexts_are_404() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(get_request("/code/contexts/deadbeef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["code"], "ContextNotFound");

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/code/contexts/deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_contexts_by_language_requires_the_parameter() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/code/contexts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response_json(response).await;
    assert_eq!(body["code"], "MissingQuery");
}

#[tokio::test]
async fn metrics_snapshot_returns_host_numbers() {
    let app = test_app();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert!(body["cpu_count"].as_f64().unwrap() >= 1.0);
    assert!(body["mem_total_mib"].as_f64().unwrap() > 0.0);
}
