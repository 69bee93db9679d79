// ABOUTME: Cluster metadata acquisition for the remote destroy build
// ABOUTME: Defines the client traits and merges a lazily fetched TLS certificate

use async_trait::async_trait;
use std::sync::Arc;
use teardown_config::ClusterSession;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("failed to provide cluster client for fetching certs: {0}")]
    ClientConstruction(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cluster API returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Cluster API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cluster metadata is missing the {0}")]
    Incomplete(&'static str),

    #[error("client is bound to context {bound}, cannot serve context {requested}")]
    ContextMismatch { bound: String, requested: String },
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// What the build needs to know about the cluster; fetched once per run
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub runner_image: String,
    pub installer_image: String,
    /// PEM bytes; empty until fetched
    pub certificate: Vec<u8>,
    /// TLS SNI override used inside the cluster
    pub server_name: String,
}

impl std::fmt::Debug for ClusterMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMetadata")
            .field("runner_image", &self.runner_image)
            .field("installer_image", &self.installer_image)
            .field("certificate", &format_args!("<{} bytes>", self.certificate.len()))
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Remote calls against the cluster API
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Metadata scoped to a namespace
    async fn cluster_metadata(&self, namespace: &str) -> MetadataResult<ClusterMetadata>;

    /// Certificate for a context and namespace
    async fn cluster_certificate(&self, context: &str, namespace: &str) -> MetadataResult<Vec<u8>>;
}

/// Builds a client bound to a cluster session
pub trait MetadataClientProvider: Send + Sync {
    fn provide(&self, session: &ClusterSession) -> MetadataResult<Arc<dyn MetadataClient>>;
}

pub struct ClusterMetadataProvider {
    clients: Arc<dyn MetadataClientProvider>,
}

impl ClusterMetadataProvider {
    pub fn new(clients: Arc<dyn MetadataClientProvider>) -> Self {
        Self { clients }
    }

    /// Fetch metadata for the session's namespace, fetching the certificate
    /// separately when the metadata does not carry one. No retries.
    pub async fn fetch(&self, session: &ClusterSession) -> MetadataResult<ClusterMetadata> {
        let client = self.clients.provide(session)?;

        let mut metadata = client.cluster_metadata(&session.namespace).await?;

        if metadata.runner_image.is_empty() {
            return Err(MetadataError::Incomplete("pipeline runner image"));
        }
        if metadata.installer_image.is_empty() {
            return Err(MetadataError::Incomplete("pipeline installer image"));
        }

        if metadata.certificate.is_empty() {
            debug!(
                "Cluster metadata has no certificate, fetching it for {}/{}",
                session.context_name, session.namespace
            );
            metadata.certificate = client
                .cluster_certificate(&session.context_name, &session.namespace)
                .await?;
        }

        info!(
            "Fetched cluster metadata (runner: {}, installer: {})",
            metadata.runner_image, metadata.installer_image
        );

        Ok(metadata)
    }
}
