mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use batch_node::api::create_router;
use batch_node::models::{CommandStatus, RunStatus};
use common::TestEnv;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let env = TestEnv::new().await;
    let app = create_router(env.start());

    let (status, body) = send(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_get_and_list_commands() {
    let env = TestEnv::new().await;
    let app = create_router(env.start());

    let (status, created) = send(
        app.clone(),
        "POST",
        "/api/commands",
        Some(json!({
            "repo": "octo/hello",
            "command": "check",
            "target_paths": ["src"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "Pending");
    assert_eq!(created["run_status"], "Begin");
    assert_eq!(created["repo"], "octo/hello");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(app.clone(), "GET", &format!("/api/commands/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["target_paths"], json!(["src"]));

    let (status, listed) = send(app.clone(), "GET", "/api/commands?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(app, "GET", "/api/commands?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn error_statuses_map_from_engine_errors() {
    let env = TestEnv::new().await;
    let running = env
        .seed(
            "octo/hello",
            "check",
            CommandStatus::Running,
            RunStatus::CheckedOut,
            false,
        )
        .await;
    let app = create_router(env.start());

    let (status, body) = send(app.clone(), "GET", "/api/commands/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));

    let (status, _) = send(
        app.clone(),
        "DELETE",
        &format!("/api/commands/{}", running.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        app.clone(),
        "PUT",
        &format!("/api/commands/{}/resume", running.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        app,
        "POST",
        "/api/commands",
        Some(json!({ "repo": "not a repo", "command": "check" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stop_then_log_reflects_request() {
    let env = TestEnv::new().await;
    let running = env
        .seed(
            "octo/hello",
            "check",
            CommandStatus::Running,
            RunStatus::ToolExecuted,
            false,
        )
        .await;
    let app = create_router(env.start());

    let (status, _) = send(
        app.clone(),
        "PUT",
        &format!("/api/commands/{}/stop", running.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(env.reload(&running.id).await.status, CommandStatus::Pending);

    let (status, log) = send(app, "GET", &format!("/api/commands/{}/log", running.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["data"][0]["message"], "stop requested");
}

#[tokio::test]
async fn lock_and_log_kind_routes() {
    let env = TestEnv::new().await;
    let seeded = env
        .seed(
            "octo/hello",
            "check",
            CommandStatus::Succeeded,
            RunStatus::End,
            false,
        )
        .await;
    let app = create_router(env.start());
    let base = format!("/api/commands/{}", seeded.id);

    let (status, body) = send(app.clone(), "PUT", &format!("{}/lock", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["locked"], true);

    let (status, body) = send(app.clone(), "PUT", &format!("{}/lock", base), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "already locked");

    let (status, _) = send(app.clone(), "DELETE", &base, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(app.clone(), "PUT", &format!("{}/unlock", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["locked"], false);

    let (status, body) = send(app.clone(), "GET", &format!("{}/log?kind=execution", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "execution");
    assert_eq!(body["data"], json!([]));

    let (status, _) = send(app.clone(), "GET", &format!("{}/log?kind=debug", base), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(app.clone(), "GET", &format!("{}/check_reports", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, _) = send(app, "GET", &format!("{}/archive", base), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
