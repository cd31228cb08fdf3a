//! Webhook handler for GitHub events

use axum::{
    body::Bytes,
    extract::Query,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use super::{admission_response, error_response, is_dry_run, reply};
use crate::SharedState;
use crate::deployment::{DeploymentRequest, dispatch};
use crate::eligibility::should_deploy;
use crate::signature::authenticate;
use crate::webhook::{WebhookData, WebhookEvent};

/// Handles the GitHub webhook POST request.
///
/// Verification and filtering happen inline; the deployment itself is
/// scheduled in the background and never awaited here.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let dry_run = is_dry_run(&params, &headers);
    let event = WebhookEvent::from_request(&headers, body);
    let delivery = event.delivery_id.as_deref().unwrap_or("-");

    info!(
        "Received {:?} webhook (delivery: {})",
        event.event_type, delivery
    );

    if let Err(e) = authenticate(&state.config.webhook_secret, &event.body, &event.signature) {
        warn!("Invalid webhook signature for delivery {}", delivery);
        return error_response(e);
    }

    let payload = match event.payload() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to parse webhook payload for delivery {}: {}", delivery, e);
            return reply(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };
    debug!("{:#?}", &payload);

    let decision = should_deploy(&event.event_type, &payload, &state.config.policy);
    if !decision.should_deploy() {
        info!("Skipping deployment: {}", decision.reason());
        return reply(
            StatusCode::OK,
            format!(
                "Webhook received but deployment skipped: {}",
                decision.reason()
            ),
        );
    }

    let delivery_id = event.delivery_id.as_deref();
    let data = match WebhookData::from_payload(&event.event_type, delivery_id, &payload) {
        Ok(data) => data,
        Err(e) => {
            error!("Delivery {} rejected: {}", delivery, e);
            return error_response(e);
        }
    };

    let admission = dispatch(&state, DeploymentRequest { data, dry_run });
    admission_response(admission, "Deployment triggered successfully")
}
