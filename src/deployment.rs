//! Turns an eligible event into a guarded background deployment

use chrono::Local;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::SharedState;
use crate::error::ResolutionError;
use crate::guard::GuardTicket;
use crate::resolver::{DeploymentTarget, resolve};
use crate::runner::{self, CommandRunner, ExecutionOutcome};
use crate::webhook::WebhookData;

/// Records kept for repository names with no configured app
const MAX_UNCONFIGURED_RECORDS: usize = 16;

/// Work item handed from the request path to [`dispatch`]
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub data: WebhookData,
    pub dry_run: bool,
}

/// What happened to a request at the moment it was dispatched
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Running in the background; results land in the status store
    Scheduled { run_id: String },
    /// Resolved and recorded, nothing spawned
    DryRun { run_id: String, command_line: String },
    /// The guard was held by another deployment
    Busy,
    /// Resolution failed; the error was recorded for the target
    Unresolved(ResolutionError),
}

/// Admit, resolve and schedule a deployment without waiting for it.
///
/// Must be called from within a tokio runtime. The guard is taken before
/// resolution and released when the background run finishes, or straight
/// away if nothing gets scheduled.
pub fn dispatch(state: &SharedState, request: DeploymentRequest) -> Admission {
    let target_key = request.data.repo_name.clone();

    let Some(ticket) = state.guard.try_acquire(&target_key) else {
        warn!("Deployment of '{}' already in progress, skipping", target_key);
        return Admission::Busy;
    };

    let run_id = Uuid::now_v7().to_string();
    let event_type = request.data.event_type.as_str();
    let delivery_id = request.data.delivery_id.as_deref();

    let target = match resolve(&target_key, &state.config) {
        Ok(target) => target,
        Err(e) => {
            error!("Cannot deploy '{}': {}", target_key, e);
            state.status.update(&target_key, |record| {
                record.begin(run_id, event_type, delivery_id, String::new());
                record.error = Some(e.to_string());
                record.finish();
            });
            if matches!(e, ResolutionError::UnknownApp(_)) {
                let config = &state.config;
                state
                    .status
                    .prune(|name| config.apps.contains_key(name), MAX_UNCONFIGURED_RECORDS);
            }
            return Admission::Unresolved(e);
        }
    };

    let command_line = runner::command_line(&target);
    state.status.update(&target_key, |record| {
        record.begin(run_id.clone(), event_type, delivery_id, command_line.clone());
    });

    if request.dry_run {
        info!(
            "[DRY_RUN] Run {} - would execute for '{}': {}",
            run_id, target_key, command_line
        );
        state.status.update(&target_key, |record| {
            record.stdout_lines = vec!["[DRY_RUN] Skipped".to_string()];
            record.finish();
        });
        return Admission::DryRun {
            run_id,
            command_line,
        };
    }

    let mut env = state.config.inherited_env.clone();
    env.extend(request.data.to_env(Local::now()));

    info!(
        "Run {} - {} event for '{}' (branch {:?}). Starting deployment.",
        run_id, event_type, target_key, request.data.branch
    );

    tokio::spawn(execute(Arc::clone(state), target, env, ticket));
    Admission::Scheduled { run_id }
}

/// Background half of [`dispatch`]. Holds `ticket` until the outcome is recorded.
async fn execute(
    state: SharedState,
    target: DeploymentTarget,
    env: BTreeMap<String, String>,
    ticket: GuardTicket,
) {
    let command_line = runner::command_line(&target);
    let runner = CommandRunner::new(state.config.timeout());

    // Run on its own task so a panic still gets recorded below
    let run = tokio::spawn(async move { runner.run(&target, &env).await });
    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(e) => ExecutionOutcome {
            command_line,
            error: Some(format!("Deployment task failed: {}", e)),
            ..ExecutionOutcome::default()
        },
    };

    let target_key = ticket.target();
    if outcome.succeeded() {
        info!("Deployment of '{}' completed successfully.", target_key);
    } else if let Some(e) = &outcome.error {
        error!("Deployment of '{}' failed: {}", target_key, e);
    } else {
        warn!(
            "Deployment of '{}' exited with code {:?}",
            target_key, outcome.return_code
        );
    }

    state.status.update(target_key, |record| {
        record.command_line = outcome.command_line;
        record.stdout_lines = outcome.stdout_lines;
        record.stderr_lines = outcome.stderr_lines;
        record.return_code = outcome.return_code;
        record.error = outcome.error;
        record.finish();
    });
    drop(ticket);
}
