pub mod api;
pub mod deployment;
pub mod eligibility;
pub mod error;
pub mod guard;
pub mod logging;
pub mod resolver;
pub mod runner;
pub mod signature;
pub mod status;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::eligibility::EventPolicy;
use crate::error::{DeployError, Result};
use crate::guard::{ExecutionGuard, GuardGranularity};
use crate::status::StatusStore;

fn default_pass_env() -> Vec<String> {
    vec!["PATH".to_string(), "HOME".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(flatten)]
    pub policy: EventPolicy,
    #[serde(default)]
    pub guard: GuardGranularity,
    pub deploy_script: Option<PathBuf>,
    #[serde(default)]
    pub apps: BTreeMap<String, AppConfig>,
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_pass_env")]
    pub pass_env: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Values of `pass_env`, captured once at startup.
    #[serde(skip)]
    pub inherited_env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub working_directory: PathBuf,
    pub commands: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub directory: Option<PathBuf>,
    pub max_files: Option<usize>,
    pub rotation: Option<String>,
}

impl DeployConfig {
    /// Parse a TOML document into a config without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `WEBHOOK_SECRET`, `DEPLOY_SCRIPT_PATH`, `ALLOWED_EVENTS` and
    /// `ALLOWED_BRANCHES` overrides, then capture the `pass_env` values.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("WEBHOOK_SECRET") {
            self.webhook_secret = secret;
        }
        if let Some(path) = lookup("DEPLOY_SCRIPT_PATH").filter(|p| !p.trim().is_empty()) {
            self.deploy_script = Some(PathBuf::from(path));
        }
        if let Some(events) = lookup("ALLOWED_EVENTS") {
            self.policy.allowed_events = split_list(&events);
        }
        if let Some(branches) = lookup("ALLOWED_BRANCHES") {
            self.policy.allowed_branches = split_list(&branches);
        }

        self.inherited_env = self
            .pass_env
            .iter()
            .filter_map(|name| lookup(name).map(|value| (name.clone(), value)))
            .collect();
        self
    }

    /// Check the config describes exactly one deploy mode.
    pub fn validate(&self) -> Result<()> {
        match (&self.deploy_script, self.apps.is_empty()) {
            (Some(_), false) => {
                return Err(DeployError::ConfigError(
                    "Configure either deploy_script or [apps], not both".to_string(),
                ));
            }
            (None, true) => {
                return Err(DeployError::ConfigError(
                    "No deploy_script or [apps] configured".to_string(),
                ));
            }
            _ => {}
        }

        if let Some((name, _)) = self.apps.iter().find(|(_, app)| app.commands.is_empty()) {
            return Err(DeployError::ConfigError(format!(
                "App '{}' must have at least one command",
                name
            )));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Load, override from the process environment, and validate the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<DeployConfig> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config = DeployConfig::from_toml_str(&config_str).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config = config.with_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

pub struct AppState {
    pub config: DeployConfig,
    pub guard: Arc<ExecutionGuard>,
    pub status: StatusStore,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: DeployConfig) -> Self {
        Self {
            guard: Arc::new(ExecutionGuard::new(config.guard)),
            status: StatusStore::new(),
            config,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
