// ABOUTME: Error types surfaced by a remote destroy run
// ABOUTME: User-facing errors and the stage-tagged error returned to the caller

use std::fmt;
use thiserror::Error;

use crate::metadata::MetadataError;
use crate::workspace::WorkspaceError;

/// Prefix for failures reported by the destroy command running inside the build
pub const COMMAND_FAILURE_CONTEXT: &str = "error during development environment deployment";

/// Prefix for any other failure of the remote build
pub const BUILD_FAILURE_CONTEXT: &str = "error during destroy of the development environment";

/// An error meant to be shown to the operator as-is.
///
/// Display prints the whole cause chain on a single line.
#[derive(Error, Debug)]
#[error("{error:#}")]
pub struct UserError {
    pub error: anyhow::Error,
}

impl UserError {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Wrap a cause behind a user-readable message
    pub fn wrap(message: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        let cause: anyhow::Error = cause.into();
        Self::new(cause.context(message))
    }
}

/// Execution stage reported alongside a failure or on completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Packaging the destroy: metadata, manifest, workspace
    Build,
    /// The remote build itself
    RemoteDeploy,
    Done,
    /// A stage label reported by the destroy command inside the build
    Command(String),
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Build => "build",
            Stage::RemoteDeploy => "remote deploy",
            Stage::Done => "done",
            Stage::Command(label) => label,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DestroyError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    User(#[from] UserError),
}

/// Failure of a remote destroy, tagged with the stage it reached
#[derive(Error, Debug)]
#[error("{error}")]
pub struct StagedError {
    pub stage: Stage,
    pub error: DestroyError,
    pub user_facing: bool,
}

impl StagedError {
    pub fn new(stage: Stage, error: DestroyError) -> Self {
        let user_facing = matches!(error, DestroyError::User(_));
        Self {
            stage,
            error,
            user_facing,
        }
    }

    /// A failure while packaging, before the build was launched
    pub fn packaging(error: impl Into<DestroyError>) -> Self {
        Self::new(Stage::Build, error.into())
    }
}
