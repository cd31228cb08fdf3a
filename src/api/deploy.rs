//! Manual deployment trigger

use axum::{
    body::Bytes,
    extract::{Path, Query, State as AxumState},
    http::HeaderMap,
    response::Response,
};
use std::collections::HashMap;
use tracing::{info, warn};

use super::{admission_response, error_response, is_dry_run};
use crate::SharedState;
use crate::deployment::{DeploymentRequest, dispatch};
use crate::signature::authenticate;
use crate::webhook::{SIGNATURE_HEADER, WebhookData};

const FALLBACK_BRANCH: &str = "main";

/// POST /deploy/{target} - Re-run a target without a webhook event.
///
/// Skips the eligibility filter but not authentication: the body (which may
/// be empty) must be signed like a webhook delivery. `?branch=` sets
/// `REPO_BRANCH`, defaulting to the first allowed branch.
pub async fn manual_deploy(
    AxumState(state): AxumState<SharedState>,
    Path(target): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if let Err(e) = authenticate(&state.config.webhook_secret, &body, signature) {
        warn!("Invalid signature for manual deploy of '{}'", target);
        return error_response(e);
    }

    let branch = params
        .get("branch")
        .cloned()
        .or_else(|| state.config.policy.allowed_branches.first().cloned())
        .unwrap_or_else(|| FALLBACK_BRANCH.to_string());

    info!("Manual deployment requested for '{}' (branch {})", target, branch);

    let request = DeploymentRequest {
        data: WebhookData::manual(target, branch),
        dry_run: is_dry_run(&params, &headers),
    };
    admission_response(dispatch(&state, request), "Manual deployment triggered")
}
