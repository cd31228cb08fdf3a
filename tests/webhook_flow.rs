use git_deploy_hook::api::router;
use git_deploy_hook::{AppConfig, AppState, DeployConfig, SharedState};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "integration-secret";

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("webhook-flow-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn state_with_app(dir: &Path, commands: &[&str]) -> SharedState {
    let mut config = DeployConfig::from_toml_str(&format!(
        "webhook_secret = \"{}\"\nallowed_branches = [\"main\"]\n",
        SECRET
    ))
    .unwrap();
    config.apps.insert(
        "site".to_string(),
        AppConfig {
            working_directory: dir.to_path_buf(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
        },
    );
    config
        .inherited_env
        .insert("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string());
    config.validate().unwrap();
    Arc::new(AppState::new(config))
}

async fn serve(state: SharedState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn push_payload(branch: &str, commits: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ref": format!("refs/heads/{}", branch),
        "after": "0123456789abcdef",
        "commits": commits,
        "repository": {
            "name": "site",
            "full_name": "acme/site",
            "clone_url": "https://github.com/acme/site.git"
        }
    }))
    .unwrap()
}

async fn post_webhook(
    base: &str,
    event: &str,
    body: Vec<u8>,
    signature: &str,
) -> (reqwest::StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}/webhook", base))
        .header("X-GitHub-Event", event)
        .header("X-GitHub-Delivery", "delivery-1")
        .header("X-Hub-Signature-256", signature)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn wait_for_record(base: &str, target: &str) -> Value {
    for _ in 0..100 {
        let response = reqwest::get(format!("{}/status/{}", base, target)).await.unwrap();
        if response.status().is_success() {
            let record: Value = response.json().await.unwrap();
            if record["in_progress"] == json!(false) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no finished record for {}", target);
}

#[tokio::test]
async fn signed_push_deploys_and_reports_status() {
    let dir = scratch_dir();
    let state = state_with_app(&dir, &["echo deploying $REPO_FULL", "echo built >&2"]);
    let base = serve(state).await;

    let body = push_payload("main", json!([{"id": "0123456"}]));
    let signature = sign(&body);
    let (status, reply) = post_webhook(&base, "push", body, &signature).await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    assert_eq!(reply["message"], "Deployment triggered successfully");

    let record = wait_for_record(&base, "site").await;
    assert_eq!(record["return_code"], 0);
    assert_eq!(record["stdout_lines"], json!(["deploying acme/site"]));
    assert_eq!(record["stderr_lines"], json!(["built"]));
    assert_eq!(record["error"], Value::Null);
    assert_eq!(record["delivery_id"], "delivery-1");
    assert_eq!(record["run_id"], reply["run_id"]);

    let overview: Value = reqwest::get(format!("{}/status", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overview["records"]["site"]["return_code"], 0);
    assert_eq!(overview["guard"]["granularity"], "per_target");
    assert_eq!(overview["mode"]["type"], "apps");
}

#[tokio::test]
async fn bad_signature_is_forbidden_and_nothing_runs() {
    let dir = scratch_dir();
    let state = state_with_app(&dir, &["touch marker"]);
    let base = serve(state.clone()).await;

    let body = push_payload("main", json!([{"id": "0123456"}]));
    let mut signature = sign(&body);
    let flipped = if signature.ends_with('0') { "1" } else { "0" };
    signature.replace_range(signature.len() - 1.., flipped);

    let (status, reply) = post_webhook(&base, "push", body.clone(), &signature).await;
    assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
    assert_eq!(reply["message"], "Invalid signature");

    let (status, _) = post_webhook(&base, "push", body, "").await;
    assert_eq!(status, reqwest::StatusCode::FORBIDDEN);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state.status.get("site").is_none());
    assert!(!dir.join("marker").exists());
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let dir = scratch_dir();
    let base = serve(state_with_app(&dir, &["true"])).await;

    let body = b"not json".to_vec();
    let signature = sign(&body);
    let (status, reply) = post_webhook(&base, "push", body, &signature).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Invalid JSON payload");
}

#[tokio::test]
async fn ineligible_events_are_acknowledged_and_skipped() {
    let dir = scratch_dir();
    let state = state_with_app(&dir, &["touch marker"]);
    let base = serve(state.clone()).await;

    let body = push_payload("main", json!([]));
    let (status, reply) = post_webhook(&base, "push", body.clone(), &sign(&body)).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        reply["message"],
        "Webhook received but deployment skipped: No commits in push event"
    );

    let body = push_payload("develop", json!([{"id": "1"}]));
    let (status, _) = post_webhook(&base, "push", body.clone(), &sign(&body)).await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let body =
        serde_json::to_vec(&json!({"action": "created", "repository": {"name": "site"}})).unwrap();
    let (status, reply) = post_webhook(&base, "release", body.clone(), &sign(&body)).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(reply["message"].as_str().unwrap().contains("'created'"));

    assert!(state.status.get("site").is_none());
    assert!(!dir.join("marker").exists());
}

#[tokio::test]
async fn second_trigger_while_running_is_busy() {
    let dir = scratch_dir();
    let state = state_with_app(&dir, &["sleep 1", "echo done"]);
    let base = serve(state.clone()).await;

    let body = push_payload("main", json!([{"id": "1"}]));
    let signature = sign(&body);
    let (status, _) = post_webhook(&base, "push", body, &signature).await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let body = push_payload("main", json!([{"id": "2"}]));
    let (status, reply) = post_webhook(&base, "push", body.clone(), &sign(&body)).await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    assert_eq!(reply["message"], "Deployment already in progress");

    let record = wait_for_record(&base, "site").await;
    assert_eq!(record["stdout_lines"], json!(["done"]));
    assert!(!state.guard.is_running("site"));

    let (status, reply) = post_webhook(&base, "push", body.clone(), &sign(&body)).await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    assert_eq!(reply["message"], "Deployment triggered successfully");
    wait_for_record(&base, "site").await;
}

#[tokio::test]
async fn unknown_repository_is_not_found_and_recorded() {
    let dir = scratch_dir();
    let state = state_with_app(&dir, &["touch marker"]);
    let base = serve(state.clone()).await;

    let body = serde_json::to_vec(&json!({
        "ref": "refs/heads/main",
        "commits": [{"id": "1"}],
        "repository": {"name": "elsewhere"}
    }))
    .unwrap();
    let (status, reply) = post_webhook(&base, "push", body.clone(), &sign(&body)).await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(reply["message"], "No app configured for repository 'elsewhere'");

    let record = state.status.get("elsewhere").unwrap();
    assert!(record.error.is_some());
    assert!(!dir.join("marker").exists());
}

#[tokio::test]
async fn manual_deploy_requires_signature() {
    let dir = scratch_dir();
    let state = state_with_app(&dir, &["echo $REPO_BRANCH"]);
    let base = serve(state).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/deploy/site", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = client
        .post(format!("{}/deploy/site?branch=hotfix", base))
        .header("X-Hub-Signature-256", sign(b""))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let record = wait_for_record(&base, "site").await;
    assert_eq!(record["event_type"], "manual");
    assert_eq!(record["stdout_lines"], json!(["hotfix"]));
}
