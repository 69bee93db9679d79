// ABOUTME: Process configuration loaded once from the environment
// ABOUTME: Produces the explicit cluster session and runtime overrides consumed by the destroy core

pub mod constants;

use std::env;
use std::num::ParseIntError;
use thiserror::Error;
use tracing::debug;

use constants::*;

/// Default timeout for cluster API requests
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid HTTP timeout: {0}")]
    InvalidTimeout(#[from] ParseIntError),
    #[error("HTTP timeout {0} is out of valid range (must be at least 1 second)")]
    TimeoutOutOfRange(u64),
    #[error("Invalid cluster API URL: {0}")]
    InvalidUrl(String),
}

/// Active cluster context, passed explicitly to everything that talks to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSession {
    pub api_url: String,
    pub context_name: String,
    pub namespace: String,
    pub token: String,
}

/// Environment-provided values that end up inside the build manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub action_name: Option<String>,
    pub git_commit: Option<String>,
    /// CLI version to run inside the build; unset means a development build
    pub cli_version: Option<String>,
    /// Replaces the CLI image when the version is not a release.
    pub cli_image_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub context_name: String,
    pub namespace: String,
    pub token: String,
    pub action_name: Option<String>,
    pub git_commit: Option<String>,
    pub cli_version: Option<String>,
    pub cli_image_override: Option<String>,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = required(OKTETO_URL)?;
        url::Url::parse(&api_url).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", api_url, e)))?;

        // The context is named after the cluster URL unless set explicitly
        let context_name = optional(OKTETO_CONTEXT).unwrap_or_else(|| api_url.clone());
        let namespace = required(OKTETO_NAMESPACE)?;
        let token = required(OKTETO_TOKEN)?;

        let http_timeout_secs = match optional(TEARDOWN_HTTP_TIMEOUT_SECS) {
            Some(raw) => raw.trim().parse::<u64>()?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };
        if http_timeout_secs == 0 {
            return Err(ConfigError::TimeoutOutOfRange(http_timeout_secs));
        }

        let config = Config {
            api_url,
            context_name,
            namespace,
            token,
            action_name: optional(OKTETO_ACTION_NAME),
            git_commit: optional(OKTETO_GIT_COMMIT),
            cli_version: optional(TEARDOWN_REMOTE_CLI_VERSION),
            cli_image_override: optional(OKTETO_REMOTE_CLI_IMAGE),
            http_timeout_secs,
        };

        debug!(
            "Loaded config for context {} (namespace: {})",
            config.context_name, config.namespace
        );

        Ok(config)
    }

    pub fn session(&self) -> ClusterSession {
        ClusterSession {
            api_url: self.api_url.clone(),
            context_name: self.context_name.clone(),
            namespace: self.namespace.clone(),
            token: self.token.clone(),
        }
    }

    pub fn runtime_env(&self) -> RuntimeEnv {
        RuntimeEnv {
            action_name: self.action_name.clone(),
            git_commit: self.git_commit.clone(),
            cli_version: self.cli_version.clone(),
            cli_image_override: self.cli_image_override.clone(),
        }
    }
}

/// Empty values count as unset
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}
