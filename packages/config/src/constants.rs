// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of every environment variable read or injected by Teardown

// Cluster Session
pub const OKTETO_URL: &str = "OKTETO_URL";
pub const OKTETO_CONTEXT: &str = "OKTETO_CONTEXT";
pub const OKTETO_NAMESPACE: &str = "OKTETO_NAMESPACE";
pub const OKTETO_TOKEN: &str = "OKTETO_TOKEN";

// Pipeline Metadata
pub const OKTETO_ACTION_NAME: &str = "OKTETO_ACTION_NAME";
pub const OKTETO_GIT_COMMIT: &str = "OKTETO_GIT_COMMIT";

// Remote Execution
pub const OKTETO_DEPLOY_REMOTE: &str = "OKTETO_DEPLOY_REMOTE";
pub const OKTETO_REMOTE_CLI_IMAGE: &str = "OKTETO_REMOTE_CLI_IMAGE"; // Development builds only
pub const TEARDOWN_REMOTE_CLI_VERSION: &str = "TEARDOWN_REMOTE_CLI_VERSION";
pub const OKTETO_INVALIDATE_CACHE: &str = "OKTETO_INVALIDATE_CACHE";

// Build Arguments (never persisted as ENV)
pub const OKTETO_TLS_CERT_BASE64: &str = "OKTETO_TLS_CERT_BASE64";
pub const INTERNAL_SERVER_NAME: &str = "INTERNAL_SERVER_NAME";

// HTTP Client
pub const TEARDOWN_HTTP_TIMEOUT_SECS: &str = "TEARDOWN_HTTP_TIMEOUT_SECS";
