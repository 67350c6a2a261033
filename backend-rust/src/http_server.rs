//! # http_server
//!
//! Loopback JSON API that a separate renderer polls. Handlers only call
//! engine methods (which synchronize internally and never touch the pose
//! source), so no request can stall on VR-runtime I/O.
//!
//! | Method | Path              | Effect                                   |
//! |--------|-------------------|------------------------------------------|
//! | GET    | `/state`          | Current engine snapshot                  |
//! | GET    | `/health`         | Liveness + version + uptime              |
//! | GET    | `/history`        | Historical heatmap over saved sessions   |
//! | POST   | `/run_diagnostic` | Start the scripted 60 s test             |
//! | POST   | `/recompute`      | Invalidate the coverage cache            |
//! | POST   | `/export`         | Write the last session's report files    |
//! | POST   | `/shutdown`       | Stop serving                             |
//! | *      | anything else     | `{"error":"not found"}` with 404         |

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use crate::state_engine::StateEngine;

const HISTORY_STEP_M: f64 = 0.25;

#[derive(Clone)]
struct AppState {
    engine: StateEngine,
    shutdown: watch::Sender<bool>,
    started: Instant,
}

pub fn router(engine: StateEngine, shutdown: watch::Sender<bool>) -> Router {
    let state = AppState {
        engine,
        shutdown,
        started: Instant::now(),
    };
    Router::new()
        .route("/state", get(get_state))
        .route("/health", get(get_health))
        .route("/history", get(get_history))
        .route("/run_diagnostic", post(post_run_diagnostic))
        .route("/recompute", post(post_recompute))
        .route("/export", post(post_export))
        .route("/shutdown", post(post_shutdown))
        .fallback(not_found)
        .with_state(state)
}

/// Bind on the loopback address and serve until `POST /shutdown`.
pub async fn serve(engine: StateEngine) -> anyhow::Result<()> {
    let (host, port) = engine.http_bind();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let app = router(engine, shutdown_tx);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("state API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Either a /shutdown request or a dropped sender ends the server.
            let _ = shutdown_rx.wait_for(|&stop| stop).await;
            info!("shutdown requested, draining connections");
        })
        .await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn get_state(State(app): State<AppState>) -> Response {
    Json(app.engine.snapshot()).into_response()
}

async fn get_health(State(app): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": app.started.elapsed().as_secs(),
        "sessions": app.engine.session_count(),
    }))
    .into_response()
}

async fn get_history(State(app): State<AppState>) -> Response {
    match app.engine.history(HISTORY_STEP_M) {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no sessions recorded" })),
        )
            .into_response(),
    }
}

async fn post_run_diagnostic(State(app): State<AppState>) -> Response {
    match app.engine.trigger_diagnostic() {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })).into_response(),
    }
}

async fn post_recompute(State(app): State<AppState>) -> Response {
    app.engine.force_recompute();
    Json(json!({ "ok": true })).into_response()
}

async fn post_export(State(app): State<AppState>) -> Response {
    match app.engine.export_last_session() {
        None => Json(json!({ "ok": false, "error": "No diagnostic session available" }))
            .into_response(),
        Some(Err(e)) => {
            Json(json!({ "ok": false, "error": e.to_string() })).into_response()
        }
        Some(Ok((summary, session))) => Json(json!({
            "ok": true,
            "summary": summary.display().to_string(),
            "session": session.display().to_string(),
        }))
        .into_response(),
    }
}

async fn post_shutdown(State(app): State<AppState>) -> Response {
    let _ = app.shutdown.send(true);
    Json(json!({ "ok": true })).into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}
