//! API module for all HTTP handlers

pub mod deploy;
pub mod handlers;
pub mod status;
pub mod webhook;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing,
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;
use crate::deployment::Admission;
use crate::error::{DeployError, ResolutionError};

// Re-export handlers
pub use deploy::manual_deploy;
pub use handlers::root;
pub use status::{status, target_status};
pub use webhook::handle_webhook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::post(handle_webhook))
        .route("/deploy/{target}", routing::post(manual_deploy))
        .route("/status", routing::get(status))
        .route("/status/{target}", routing::get(target_status))
        .with_state(state)
}

pub(crate) fn reply(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// `?dry_run=true` or `X-Dry-Run: true`
pub(crate) fn is_dry_run(params: &HashMap<String, String>, headers: &HeaderMap) -> bool {
    let header = headers.get("x-dry-run").and_then(|v| v.to_str().ok());
    params.get("dry_run").map(String::as_str).is_some_and(is_truthy)
        || header.is_some_and(is_truthy)
}

/// Status code for an error raised on the request path
pub(crate) fn error_response(error: DeployError) -> Response {
    let status = match &error {
        DeployError::AuthenticationFailure => StatusCode::FORBIDDEN,
        DeployError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        DeployError::Resolution(ResolutionError::UnknownApp(_)) => StatusCode::NOT_FOUND,
        DeployError::Resolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match &error {
        DeployError::AuthenticationFailure => "Invalid signature".to_string(),
        other => other.to_string(),
    };
    reply(status, message)
}

pub(crate) fn admission_response(admission: Admission, scheduled_message: &str) -> Response {
    match admission {
        Admission::Scheduled { run_id } => (
            StatusCode::ACCEPTED,
            Json(json!({ "message": scheduled_message, "run_id": run_id })),
        )
            .into_response(),
        Admission::DryRun {
            run_id,
            command_line,
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Dry run recorded",
                "run_id": run_id,
                "command_line": command_line,
            })),
        )
            .into_response(),
        Admission::Busy => reply(StatusCode::ACCEPTED, "Deployment already in progress"),
        Admission::Unresolved(e) => error_response(e.into()),
    }
}
