//! Unary transport and download-directory routes, driven through the router
//! with `oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bytes::Bytes;
use futures_util::stream;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use ytdlp_webui_core::{JobRecord, JobStatus, Registry};
use ytdlp_webui_server::{create_app, AppState, Config};

fn setup() -> (TempDir, Arc<AppState>, Router) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::for_dir(dir.path());
    config.downloader = dir.path().join("no-such-tool");
    let registry = Arc::new(Registry::new(config.snapshot_path()));
    let state = AppState::new(&config, registry, CancellationToken::new());
    let app = create_app(Arc::clone(&state));
    (dir, state, app)
}

async fn request(app: &Router, method: &str, uri: &str, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn call(app: &Router, frame: Value) -> Value {
    let (status, body) = request(app, "POST", "/http-rpc", frame.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_unary_call_returns_result() {
    let (_dir, state, app) = setup();
    let job = JobRecord::new("https://example.com/v", vec![]);
    state.registry.put(job.clone());

    let reply = call(&app, json!({"id": 7, "method": "Service.Progress", "params": [{"id": job.id}]})).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"], Value::Null);
    assert_eq!(reply["result"]["url"], "https://example.com/v");
    assert_eq!(reply["result"]["status"], "pending");
}

#[tokio::test]
async fn test_unknown_method_is_200_with_error() {
    let (_dir, _state, app) = setup();
    let reply = call(&app, json!({"id": 1, "method": "Service.Nope", "params": []})).await;
    assert_eq!(
        reply,
        json!({"id": 1, "result": null, "error": "rpc: can't find method Service.Nope"})
    );
}

#[tokio::test]
async fn test_malformed_body_is_200_with_decode_error() {
    let (_dir, _state, app) = setup();
    let (status, body) = request(&app, "POST", "/http-rpc", "{\"id\": 1, \"method\":").await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["result"], Value::Null);
    assert!(reply["error"].as_str().unwrap().starts_with("rpc: decode error"));
}

#[tokio::test]
async fn test_call_split_across_body_chunks() {
    let (_dir, _state, app) = setup();
    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"{\"id\":5,\"me")),
        Ok(Bytes::from_static(b"thod\":\"Service.Pen")),
        Ok(Bytes::from_static(b"ding\",\"par")),
        Ok(Bytes::from_static(b"ams\":[]}")),
    ];
    let body = Body::from_stream(stream::iter(chunks));

    let (status, body) = request(&app, "POST", "/http-rpc", body).await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply, json!({"id": 5, "result": [], "error": null}));
}

#[tokio::test]
async fn test_body_stream_failure_is_400() {
    let (_dir, state, app) = setup();
    let chunks = vec![
        Ok(Bytes::from_static(b"{\"id\":6,\"method\":\"Service.Ex")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        Ok(Bytes::from_static(b"ec\",\"params\":[{\"url\":\"https://example.com/v\"}]}")),
    ];
    let body = Body::from_stream(stream::iter(chunks));

    let (status, body) = request(&app, "POST", "/http-rpc", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "Bad request");
    assert!(error["details"].as_str().unwrap().contains("failed to read request body"));
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_exec_kill_over_unary_transport() {
    let (_dir, state, app) = setup();

    let reply = call(
        &app,
        json!({"id": "a", "method": "Service.Exec", "params": [{"url": "https://example.com/x"}]}),
    )
    .await;
    let id = reply["result"].as_str().unwrap().to_string();
    assert!(state.registry.get(&id).is_some());

    let reply = call(&app, json!({"id": "b", "method": "Service.Running", "params": []})).await;
    assert_eq!(reply["result"].as_array().unwrap().len(), 1);

    let reply = call(&app, json!({"id": "c", "method": "Service.Kill", "params": [{"id": id}]})).await;
    assert_eq!(reply["result"], json!(id));
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_health_counts_jobs() {
    let (_dir, state, app) = setup();
    let mut done = JobRecord::new("https://example.com/d", vec![]);
    done.status = JobStatus::Completed;
    state.registry.put(done);

    let (status, body) = request(&app, "GET", "/api/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["jobs"], 1);
}

#[tokio::test]
async fn test_downloaded_files_listed_newest_first() {
    let (_dir, state, app) = setup();
    std::fs::create_dir_all(&state.download_dir).unwrap();
    std::fs::write(state.download_dir.join("old.mp4"), b"old").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    std::fs::write(state.download_dir.join("new.mp4"), b"newer").unwrap();
    std::fs::write(state.download_dir.join("partial.mp4.part"), b"..").unwrap();

    let (status, body) = request(&app, "POST", "/downloaded", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let files: Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = files
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["new.mp4", "old.mp4"]);
    assert_eq!(files[0]["size"], 5);
}

#[tokio::test]
async fn test_downloaded_with_missing_dir_is_empty() {
    let (_dir, _state, app) = setup();
    let (status, body) = request(&app, "POST", "/downloaded", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"[]");
}

#[tokio::test]
async fn test_send_file_by_hex_id() {
    let (_dir, state, app) = setup();
    std::fs::create_dir_all(state.download_dir.join("music")).unwrap();
    std::fs::write(state.download_dir.join("music").join("song.mp3"), b"la la la").unwrap();

    let id = hex::encode("music/song.mp3");
    let (status, body) = request(&app, "GET", &format!("/d/{id}"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"la la la");

    let id = hex::encode("../session.json");
    let (status, _) = request(&app, "GET", &format!("/d/{id}"), Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(&app, "GET", "/d/not-hex", Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_file_containment() {
    let (dir, state, app) = setup();
    std::fs::create_dir_all(&state.download_dir).unwrap();
    let target = state.download_dir.join("gone.webm");
    std::fs::write(&target, b"bye").unwrap();
    std::fs::write(dir.path().join("keep.txt"), b"stay").unwrap();

    let outside = json!({"path": dir.path().join("keep.txt")}).to_string();
    let (status, _) = request(&app, "POST", "/delete", outside).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(dir.path().join("keep.txt").exists());

    let (status, _) = request(&app, "POST", "/delete", json!({"path": "missing.webm"}).to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&app, "POST", "/delete", json!({"path": target}).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!target.exists());
}

#[tokio::test]
async fn test_delete_by_listed_path() {
    let (_dir, state, app) = setup();
    std::fs::create_dir_all(state.download_dir.join("clips")).unwrap();
    std::fs::write(state.download_dir.join("clips").join("a.mp4"), b"clip").unwrap();

    let (_, body) = request(&app, "POST", "/downloaded", Body::empty()).await;
    let files: Value = serde_json::from_slice(&body).unwrap();
    let listed = files[0]["path"].as_str().unwrap().to_string();

    let (status, _) = request(&app, "POST", "/delete", json!({"path": listed}).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!state.download_dir.join("clips").join("a.mp4").exists());

    let (_, body) = request(&app, "POST", "/downloaded", Body::empty()).await;
    assert_eq!(body, b"[]");
}
