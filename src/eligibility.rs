//! Decides whether a webhook event should trigger a deployment

use serde::Deserialize;
use serde_json::Value;

fn default_events() -> Vec<String> {
    vec!["push".to_string(), "release".to_string()]
}

fn default_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

/// Allow-lists consulted by [`should_deploy`]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EventPolicy {
    #[serde(default = "default_events")]
    pub allowed_events: Vec<String>,
    #[serde(default = "default_branches")]
    pub allowed_branches: Vec<String>,
}

impl Default for EventPolicy {
    fn default() -> Self {
        Self {
            allowed_events: default_events(),
            allowed_branches: default_branches(),
        }
    }
}

impl EventPolicy {
    pub fn allows_event(&self, event_type: &str) -> bool {
        self.allowed_events.iter().any(|e| e == event_type)
    }

    pub fn allows_branch(&self, branch: &str) -> bool {
        self.allowed_branches.iter().any(|b| b == branch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Deploy(String),
    Skip(String),
}

impl Decision {
    pub fn should_deploy(&self) -> bool {
        matches!(self, Decision::Deploy(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Deploy(reason) | Decision::Skip(reason) => reason,
        }
    }
}

/// Branch name of a push `ref`, e.g. `refs/heads/main` -> `main`
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

/// Policy decision for one event. Event types outside the allow-list are
/// skipped; `push` and `release` carry extra checks, any other allowed type
/// deploys unconditionally.
pub fn should_deploy(event_type: &str, payload: &Value, policy: &EventPolicy) -> Decision {
    if !policy.allows_event(event_type) {
        return Decision::Skip(format!(
            "Event type '{}' not in allowed events",
            event_type
        ));
    }

    match event_type {
        "push" => {
            let git_ref = payload.get("ref").and_then(Value::as_str).unwrap_or("");
            let branch = branch_from_ref(git_ref);
            if !policy.allows_branch(branch) {
                return Decision::Skip(format!("Branch '{}' not in allowed branches", branch));
            }

            // Branch deletions carry no commits
            let has_commits = payload
                .get("commits")
                .and_then(Value::as_array)
                .is_some_and(|commits| !commits.is_empty());
            if !has_commits {
                return Decision::Skip("No commits in push event".to_string());
            }
        }
        "release" => {
            let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
            if action != "published" {
                return Decision::Skip(format!(
                    "Release action '{}' does not trigger deployment",
                    action
                ));
            }
        }
        _ => {}
    }

    Decision::Deploy("Deployment conditions met".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> EventPolicy {
        EventPolicy {
            allowed_events: vec!["push".into(), "release".into(), "workflow_dispatch".into()],
            allowed_branches: vec!["main".into()],
        }
    }

    #[test]
    fn push_to_allowed_branch_with_commits_deploys() {
        let payload = json!({"ref": "refs/heads/main", "commits": [{"id": "abc"}]});
        assert!(should_deploy("push", &payload, &policy()).should_deploy());
    }

    #[test]
    fn push_without_commits_is_skipped() {
        for payload in [
            json!({"ref": "refs/heads/main", "commits": []}),
            json!({"ref": "refs/heads/main"}),
            json!({"ref": "refs/heads/main", "commits": null}),
        ] {
            let decision = should_deploy("push", &payload, &policy());
            assert_eq!(decision, Decision::Skip("No commits in push event".into()));
        }
    }

    #[test]
    fn push_to_other_branch_names_the_branch() {
        let payload = json!({"ref": "refs/heads/feature/x", "commits": [{"id": "abc"}]});
        let decision = should_deploy("push", &payload, &policy());
        assert!(!decision.should_deploy());
        assert!(decision.reason().contains("feature/x"));
    }

    #[test]
    fn release_requires_published_action() {
        let published = json!({"action": "published"});
        assert!(should_deploy("release", &published, &policy()).should_deploy());

        for action in ["created", "edited"] {
            let decision = should_deploy("release", &json!({"action": action}), &policy());
            assert!(!decision.should_deploy());
            assert!(decision.reason().contains(action));
        }
    }

    #[test]
    fn unlisted_event_type_is_rejected_by_name() {
        let decision = should_deploy("issues", &json!({}), &policy());
        assert_eq!(
            decision,
            Decision::Skip("Event type 'issues' not in allowed events".into())
        );
    }

    #[test]
    fn other_allowed_event_types_pass_unconditionally() {
        assert!(should_deploy("workflow_dispatch", &json!({}), &policy()).should_deploy());
    }

    #[test]
    fn strips_only_heads_prefix() {
        assert_eq!(branch_from_ref("refs/heads/main"), "main");
        assert_eq!(branch_from_ref("refs/tags/v1"), "refs/tags/v1");
    }
}
