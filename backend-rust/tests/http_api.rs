//! Router-level tests for the loopback JSON API, driven through
//! `tower::ServiceExt::oneshot` without binding a socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use coach_backend::coverage::CoverageParams;
use coach_backend::http_server::router;
use coach_backend::state_engine::{EngineConfig, Snapshot, StateEngine};
use coach_backend::storage::AppPaths;
use rig_simulator::scenarios::ScenarioConfig;
use rig_simulator::{RigConfig, SimulatedRig};

fn test_engine(data_dir: &std::path::Path) -> StateEngine {
    let paths = AppPaths::at(data_dir);
    paths.ensure_dirs().unwrap();
    let source = Arc::new(SimulatedRig::new(
        RigConfig::default(),
        ScenarioConfig::default(),
    ));
    let cfg = EngineConfig {
        poll_rate_hz: 60.0,
        diagnostic_rate_hz: 45.0,
        diagnostic_duration_s: 1.0,
        coverage: CoverageParams::default(),
        http_bind_host: "127.0.0.1".to_string(),
        http_bind_port: 0,
    };
    StateEngine::new(source, paths, cfg)
}

async fn wait_ready(engine: &StateEngine) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let s = engine.snapshot();
        if s.connected && s.stations.len() == 2 && s.trackers.len() == 3 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("engine never became ready");
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post(path: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn state_returns_a_decodable_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    engine.start();
    wait_ready(&engine).await;

    let (tx, _rx) = watch::channel(false);
    let app = router(engine.clone(), tx);
    let response = app.oneshot(get("/state")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );

    let value = body_json(response).await;
    let snapshot: Snapshot = serde_json::from_value(value).unwrap();
    assert!(snapshot.connected);
    assert_eq!(snapshot.trackers.len(), 3);

    engine.stop();
}

#[tokio::test]
async fn unknown_paths_get_a_json_404() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (tx, _rx) = watch::channel(false);
    let app = router(engine, tx);

    for request in [get("/nope"), post("/state/extra")] {
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = body_json(response).await;
        assert_eq!(value["error"], "not found");
    }
}

#[tokio::test]
async fn diagnostic_is_rejected_when_nothing_is_selected() {
    let dir = tempfile::tempdir().unwrap();
    // Engine deliberately not started: no trackers adopted.
    let engine = test_engine(dir.path());
    let (tx, _rx) = watch::channel(false);
    let app = router(engine, tx);

    let response = app.oneshot(post("/run_diagnostic")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["ok"], false);
    assert!(value["error"].as_str().unwrap().contains("Trackers"));
}

#[tokio::test]
async fn recompute_acknowledges() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (tx, _rx) = watch::channel(false);
    let app = router(engine, tx);

    let response = app.oneshot(post("/recompute")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn shutdown_signals_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (tx, rx) = watch::channel(false);
    let app = router(engine, tx);

    let response = app.oneshot(post("/shutdown")).await.unwrap();
    let value = body_json(response).await;
    assert_eq!(value["ok"], true);
    assert!(*rx.borrow());
}

#[tokio::test]
async fn health_reports_version_and_uptime() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (tx, _rx) = watch::channel(false);
    let app = router(engine, tx);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["status"], "ok");
    assert!(value["version"].is_string());
    assert_eq!(value["sessions"], 0);
}

#[tokio::test]
async fn history_is_404_until_a_session_exists() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (tx, _rx) = watch::channel(false);
    let app = router(engine, tx);

    let response = app.oneshot(get("/history")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let value = body_json(response).await;
    assert!(value["error"].as_str().unwrap().contains("no sessions"));
}

#[tokio::test]
async fn export_requires_a_finished_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let (tx, _rx) = watch::channel(false);
    let app = router(engine, tx);

    let response = app.oneshot(post("/export")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["ok"], false);
    assert!(value["error"]
        .as_str()
        .unwrap()
        .contains("No diagnostic session"));
}
