//! Status API endpoints

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};

use crate::SharedState;

fn mode(state: &SharedState) -> Value {
    match &state.config.deploy_script {
        Some(script) => json!({
            "type": "script",
            "deploy_script_path": script.display().to_string(),
            "deploy_script_exists": script.is_file(),
        }),
        None => json!({
            "type": "apps",
            "apps": state.config.apps.keys().collect::<Vec<_>>(),
        }),
    }
}

/// GET /status - Latest execution record for every target
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let running = state.guard.running_targets();

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "mode": mode(&state),
        "guard": {
            "granularity": state.guard.granularity(),
            "running": running,
        },
        "is_deploying": !running.is_empty(),
        "records": state.status.snapshot(),
    }))
}

/// GET /status/{target} - Latest execution record for one target
pub async fn target_status(
    AxumState(state): AxumState<SharedState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match state.status.get(&target) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No deployment recorded for '{}'", target)})),
        )
            .into_response(),
    }
}
