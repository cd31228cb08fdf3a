use std::io;
use std::path::PathBuf;

/// Custom error type for git_deploy_hook operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Invalid webhook signature")]
    AuthenticationFailure,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Deployment execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Why a repository name could not be turned into a deployable target
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("No app configured for repository '{0}'")]
    UnknownApp(String),

    #[error("Working directory not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("App '{0}' has no commands configured")]
    EmptyCommands(String),
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
