//! Webhook related structures

use axum::body::Bytes;
use axum::http::HeaderMap;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::eligibility::branch_from_ref;
use crate::error::{DeployError, Result};

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// One inbound delivery. `body` holds the exact bytes received, which is
/// what the signature covers.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    pub delivery_id: Option<String>,
    pub signature: String,
    pub body: Bytes,
}

impl WebhookEvent {
    pub fn from_request(headers: &HeaderMap, body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };

        Self {
            event_type: header(EVENT_HEADER).unwrap_or_default(),
            delivery_id: header(DELIVERY_HEADER),
            signature: header(SIGNATURE_HEADER).unwrap_or_default(),
            body,
        }
    }

    pub fn payload(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).map_err(|e| DeployError::MalformedPayload(e.to_string()))
    }
}

/// Data extracted from webhook payload
/// This data is passed to deploy commands as environment variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookData {
    pub event_type: String,
    pub delivery_id: Option<String>,
    pub repo_name: String,
    pub repo_full_name: Option<String>,
    pub clone_url: Option<String>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub release_tag: Option<String>,
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

impl WebhookData {
    /// Pull the deploy-relevant fields out of a payload. `repository.name`
    /// is required since it selects the target.
    pub fn from_payload(
        event_type: &str,
        delivery_id: Option<&str>,
        payload: &Value,
    ) -> Result<Self> {
        let repo_name = str_at(payload, &["repository", "name"]).ok_or_else(|| {
            DeployError::MalformedPayload("missing repository.name".to_string())
        })?;

        let branch = match event_type {
            "release" => str_at(payload, &["release", "target_commitish"]),
            _ => str_at(payload, &["ref"]).map(branch_from_ref),
        };

        Ok(Self {
            event_type: event_type.to_string(),
            delivery_id: delivery_id.map(String::from),
            repo_name: repo_name.to_string(),
            repo_full_name: str_at(payload, &["repository", "full_name"]).map(String::from),
            clone_url: str_at(payload, &["repository", "clone_url"])
                .or_else(|| str_at(payload, &["repository", "git_url"]))
                .map(String::from),
            branch: branch.map(String::from),
            commit_sha: str_at(payload, &["after"]).map(String::from),
            release_tag: str_at(payload, &["release", "tag_name"]).map(String::from),
        })
    }

    /// Minimal data for a manually triggered deploy
    pub fn manual(repo_name: String, branch: String) -> Self {
        Self {
            event_type: "manual".to_string(),
            repo_name,
            branch: Some(branch),
            ..Self::default()
        }
    }

    /// Environment variables describing this event. Absent fields are
    /// omitted, except the `REPO_*` set which is always present.
    pub fn to_env(&self, now: DateTime<Local>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut set = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                env.insert(key.to_string(), value.to_string());
            }
        };

        set("REPO_BRANCH", Some(self.branch.as_deref().unwrap_or("")));
        set("REPO_NAME", Some(self.repo_name.as_str()));
        set("REPO_LINK", Some(self.clone_url.as_deref().unwrap_or("")));
        set("REPO_FULL", Some(self.repo_full_name.as_deref().unwrap_or("")));
        set("REPO_DATE", Some(now.format("%Y-%m-%d %H:%M:%S").to_string().as_str()));
        set("DEPLOY_EVENT", Some(self.event_type.as_str()));
        set("DEPLOY_DELIVERY", self.delivery_id.as_deref());
        set("COMMIT_SHA", self.commit_sha.as_deref());
        set("RELEASE_TAG", self.release_tag.as_deref());
        env
    }
}
