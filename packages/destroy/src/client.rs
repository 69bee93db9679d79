// ABOUTME: HTTP client for the cluster API used to fetch metadata and certificates
// ABOUTME: Speaks GraphQL over reqwest with bearer-token authentication

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use teardown_config::ClusterSession;
use tracing::debug;

use crate::metadata::{
    ClusterMetadata, MetadataClient, MetadataClientProvider, MetadataError, MetadataResult,
};

const METADATA_QUERY: &str =
    "query GetClusterMetadata($namespace: String!) { metadata(namespace: $namespace) { name value } }";

const CREDENTIALS_QUERY: &str =
    "query GetCredentials($space: String!) { credentials(space: $space) { certificate } }";

// Metadata keys returned by the cluster API
const RUNNER_IMAGE_KEY: &str = "pipelineRunnerImage";
const INSTALLER_IMAGE_KEY: &str = "pipelineInstallerImage";
const CERTIFICATE_KEY: &str = "internalCertificateBase64";
const SERVER_NAME_KEY: &str = "serverName";

#[derive(Debug, Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MetadataData {
    metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsData {
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    certificate: String,
}

pub struct HttpMetadataClient {
    http_client: Client,
    graphql_url: String,
    context_name: String,
    token: String,
}

impl HttpMetadataClient {
    pub fn new(session: &ClusterSession, timeout: Duration) -> MetadataResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::ClientConstruction(e.to_string()))?;

        Ok(Self {
            http_client,
            graphql_url: format!("{}/graphql", session.api_url.trim_end_matches('/')),
            context_name: session.context_name.clone(),
            token: session.token.clone(),
        })
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> MetadataResult<T> {
        let response = self
            .http_client
            .post(&self.graphql_url)
            .bearer_auth(&self.token)
            .json(&GraphQLRequest { query, variables })
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(MetadataError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: GraphQLResponse<T> = response
            .json()
            .await
            .map_err(|e| MetadataError::InvalidResponse(e.to_string()))?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(MetadataError::Api(messages.join("; ")));
        }

        body.data
            .ok_or_else(|| MetadataError::InvalidResponse("response contained no data".to_string()))
    }
}

fn decode_certificate(encoded: &str) -> MetadataResult<Vec<u8>> {
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| MetadataError::InvalidResponse(format!("invalid certificate encoding: {}", e)))
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn cluster_metadata(&self, namespace: &str) -> MetadataResult<ClusterMetadata> {
        debug!("Requesting cluster metadata for namespace {}", namespace);

        let data: MetadataData = self
            .query(METADATA_QUERY, serde_json::json!({ "namespace": namespace }))
            .await?;

        let mut metadata = ClusterMetadata::default();
        for entry in data.metadata {
            match entry.name.as_str() {
                RUNNER_IMAGE_KEY => metadata.runner_image = entry.value,
                INSTALLER_IMAGE_KEY => metadata.installer_image = entry.value,
                SERVER_NAME_KEY => metadata.server_name = entry.value,
                CERTIFICATE_KEY if !entry.value.is_empty() => {
                    metadata.certificate = decode_certificate(&entry.value)?
                }
                _ => {}
            }
        }

        if metadata.runner_image.is_empty() {
            return Err(MetadataError::Incomplete("pipeline runner image"));
        }
        if metadata.installer_image.is_empty() {
            return Err(MetadataError::Incomplete("pipeline installer image"));
        }

        Ok(metadata)
    }

    async fn cluster_certificate(&self, context: &str, namespace: &str) -> MetadataResult<Vec<u8>> {
        // The token only authenticates against the context it was issued for
        if context != self.context_name {
            return Err(MetadataError::ContextMismatch {
                bound: self.context_name.clone(),
                requested: context.to_string(),
            });
        }
        debug!("Requesting cluster certificate for {}/{}", context, namespace);

        let data: CredentialsData = self
            .query(CREDENTIALS_QUERY, serde_json::json!({ "space": namespace }))
            .await?;

        if data.credentials.certificate.is_empty() {
            return Err(MetadataError::Incomplete("cluster certificate"));
        }

        decode_certificate(&data.credentials.certificate)
    }
}

/// Provides HTTP clients with a fixed request timeout
pub struct HttpMetadataClientProvider {
    timeout: Duration,
}

impl HttpMetadataClientProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MetadataClientProvider for HttpMetadataClientProvider {
    fn provide(&self, session: &ClusterSession) -> MetadataResult<Arc<dyn MetadataClient>> {
        if session.token.is_empty() {
            return Err(MetadataError::ClientConstruction(
                "no access token for the active context".to_string(),
            ));
        }
        Ok(Arc::new(HttpMetadataClient::new(session, self.timeout)?))
    }
}
