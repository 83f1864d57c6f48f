//! HTTP boundary tests, driving the router directly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{album_candidate, TestHarness};
use tower::ServiceExt;

use tarantella_import_server::server::websocket::ConnectionManager;
use tarantella_import_server::server::{make_app, ServerState};

fn app(harness: &TestHarness) -> Router {
    make_app(ServerState::new(
        harness.dispatcher.clone(),
        harness.store.clone(),
        Arc::new(ConnectionManager::new()),
    ))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = TestHarness::new();
    let response = app(&harness).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_enqueue_unknown_kind_is_bad_request() {
    let harness = TestHarness::new();
    let response = app(&harness)
        .oneshot(post_json(
            "/api/enqueue",
            serde_json::json!({
                "kind": "retag",
                "folder_hash": "h1",
                "folder_path": "/music/in/a",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["type"], "InvalidUsageException");
}

#[tokio::test]
async fn test_session_lookup_not_found() {
    let harness = TestHarness::new();
    let response = app(&harness)
        .oneshot(get("/api/sessions/deadbeef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["type"], "NotFoundException");
}

#[tokio::test]
async fn test_enqueue_preview_and_fetch_session() {
    let harness = TestHarness::new();
    harness
        .matcher
        .set_lookup(vec![album_candidate("mb-nena", "Nena", "99 Luftballons", 0.05)]);

    let folder = harness.create_album_folder("Nena-99RedBalloons", &["01.mp3"]);
    let folder = harness.scan(&folder);

    let response = app(&harness)
        .oneshot(post_json(
            "/api/enqueue",
            serde_json::json!({
                "kind": "preview",
                "folder_hash": folder.hash,
                "folder_path": folder.path.to_string_lossy(),
                "frontend_ref": "req-42",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let meta = body_json(response).await;
    assert_eq!(meta["job_kind"], "preview");
    assert_eq!(meta["frontend_ref"], "req-42");

    let job_id = meta["job_id"].as_str().unwrap().to_string();
    let record = harness
        .dispatcher
        .wait_for_job(&job_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(
        record.status,
        tarantella_import_server::jobs::JobStatus::Succeeded,
        "{:?}",
        record.result
    );

    let response = app(&harness)
        .oneshot(get(&format!("/api/sessions/{}", folder.hash)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;
    assert_eq!(session["folder_hash"], folder.hash.as_str());
    assert_eq!(session["status"]["progress"], "preview_completed");
    assert_eq!(session["tasks"].as_array().unwrap().len(), 1);

    // Job registry exposed over HTTP as well.
    let response = app(&harness)
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["status"], "succeeded");
}
