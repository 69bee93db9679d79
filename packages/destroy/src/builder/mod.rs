// ABOUTME: Image builder abstraction used to run the destroy remotely
// ABOUTME: Build options, output modes and the error shape builders report

pub mod docker;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub use docker::DockerBuilder;

/// How build progress is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Every build line reaches the log
    Plain,
    /// Only messages emitted by the nested destroy command reach the log
    #[default]
    Destroy,
}

#[derive(Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub manifest_path: PathBuf,
    /// Root of the build context
    pub context_path: PathBuf,
    pub output_mode: OutputMode,
    pub build_args: Vec<(String, String)>,
}

impl BuildOptions {
    /// Options for running the destroy from a staged manifest
    pub fn for_remote_destroy(manifest_path: impl Into<PathBuf>, context_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            context_path: context_path.into(),
            output_mode: OutputMode::Destroy,
            build_args: Vec::new(),
        }
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_build_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.push((name.into(), value.into()));
        self
    }

    pub fn build_arg(&self, name: &str) -> Option<&str> {
        self.build_args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

// Build args carry secrets, only their names are printed
impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arg_names: Vec<&str> = self.build_args.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("BuildOptions")
            .field("manifest_path", &self.manifest_path)
            .field("context_path", &self.context_path)
            .field("output_mode", &self.output_mode)
            .field("build_args", &arg_names)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    /// The destroy command failed while reporting the given stage
    #[error("{cause:#}")]
    Command { stage: String, cause: anyhow::Error },

    #[error(transparent)]
    User(#[from] crate::error::UserError),

    #[error("{0:#}")]
    Other(anyhow::Error),
}

#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, options: &BuildOptions) -> Result<(), BuildError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_remote_destroy_defaults() {
        let options = BuildOptions::for_remote_destroy("/tmp/ws/deploy", "/src");

        assert_eq!(options.output_mode, OutputMode::Destroy);
        assert!(options.build_args.is_empty());
    }

    #[test]
    fn test_with_output_mode() {
        let options =
            BuildOptions::for_remote_destroy("deploy", ".").with_output_mode(OutputMode::Plain);

        assert_eq!(options.output_mode, OutputMode::Plain);
    }

    #[test]
    fn test_build_arg_lookup() {
        let options = BuildOptions::for_remote_destroy("deploy", ".")
            .with_build_arg("OKTETO_TLS_CERT_BASE64", "Y2VydA==")
            .with_build_arg("INTERNAL_SERVER_NAME", "");

        assert_eq!(options.build_arg("OKTETO_TLS_CERT_BASE64"), Some("Y2VydA=="));
        assert_eq!(options.build_arg("INTERNAL_SERVER_NAME"), Some(""));
        assert_eq!(options.build_arg("MISSING"), None);
    }

    #[test]
    fn test_debug_redacts_build_arg_values() {
        let options =
            BuildOptions::for_remote_destroy("deploy", ".").with_build_arg("TOKEN", "hunter2");

        let rendered = format!("{:?}", options);
        assert!(rendered.contains("TOKEN"));
        assert!(!rendered.contains("hunter2"));
    }
}
