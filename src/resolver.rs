//! Maps a repository name onto a deployable target

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::DeployConfig;
use crate::error::ResolutionError;

/// What the runner executes for a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAction {
    /// Ordered shell commands, AND-composed into one invocation
    Commands(Vec<String>),
    /// A standalone deploy script
    Script(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    pub name: String,
    pub working_directory: PathBuf,
    pub action: TargetAction,
}

/// Look up `repo_name` and validate its working directory. Nothing is executed.
///
/// With a `deploy_script` configured every repository resolves to that script,
/// run from the script's own directory. Otherwise `repo_name` must appear in `[apps]`.
pub fn resolve(
    repo_name: &str,
    config: &DeployConfig,
) -> Result<DeploymentTarget, ResolutionError> {
    let (working_directory, action) = match &config.deploy_script {
        Some(script) => (script_directory(script), TargetAction::Script(script.clone())),
        None => {
            let app = config
                .apps
                .get(repo_name)
                .ok_or_else(|| ResolutionError::UnknownApp(repo_name.to_string()))?;
            if app.commands.is_empty() {
                return Err(ResolutionError::EmptyCommands(repo_name.to_string()));
            }
            (
                app.working_directory.clone(),
                TargetAction::Commands(app.commands.clone()),
            )
        }
    };

    if !working_directory.is_dir() {
        return Err(ResolutionError::PathNotFound(working_directory));
    }

    Ok(DeploymentTarget {
        name: repo_name.to_string(),
        working_directory,
        action,
    })
}

fn script_directory(script: &Path) -> PathBuf {
    match script.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
