// ABOUTME: Remote destroy packaging for development environments
// ABOUTME: Runs the destroy inside an ephemeral image build against the cluster

pub mod builder;
pub mod classifier;
pub mod client;
pub mod destroyer;
pub mod error;
pub mod flags;
pub mod log;
pub mod manifest;
pub mod metadata;
pub mod workspace;

pub use builder::{BuildError, BuildOptions, Builder, DockerBuilder, OutputMode};
pub use classifier::classify_build_error;
pub use client::{HttpMetadataClient, HttpMetadataClientProvider};
pub use destroyer::RemoteDestroyer;
pub use error::{DestroyError, Stage, StagedError, UserError};
pub use flags::{destroy_flags, DestroyOptions};
pub use log::{ExecutionLog, LogEntry, LogLevel, EOF_SENTINEL};
pub use manifest::{resolve_cli_version, BuildManifest, ManifestContext};
pub use metadata::{
    ClusterMetadata, ClusterMetadataProvider, MetadataClient, MetadataClientProvider,
    MetadataError,
};
pub use workspace::{
    EphemeralWorkspace, OsWorkingDirectory, WorkingDirectory, WorkspaceError, WorkspaceStager,
};
