// ABOUTME: Runs a development environment destroy as a remote image build
// ABOUTME: Fetches metadata, stages the manifest, builds it and reports the stage reached

use base64::{engine::general_purpose, Engine as _};
use std::collections::BTreeMap;
use std::sync::Arc;
use teardown_config::constants::{INTERNAL_SERVER_NAME, OKTETO_TLS_CERT_BASE64};
use teardown_config::{ClusterSession, RuntimeEnv};
use tracing::{debug, info, warn};

use crate::builder::{BuildOptions, Builder, OutputMode};
use crate::classifier::classify_build_error;
use crate::error::{Stage, StagedError};
use crate::flags::{destroy_flags, DestroyOptions};
use crate::log::{ExecutionLog, LogLevel, EOF_SENTINEL};
use crate::manifest::{BuildManifest, ManifestContext, ManifestInputs};
use crate::metadata::{ClusterMetadataProvider, MetadataClientProvider};
use crate::workspace::{OsWorkingDirectory, WorkingDirectory, WorkspaceStager};

pub struct RemoteDestroyer {
    builder: Arc<dyn Builder>,
    metadata: ClusterMetadataProvider,
    stager: WorkspaceStager,
    working_dir: Arc<dyn WorkingDirectory>,
    log: ExecutionLog,
    session: ClusterSession,
    runtime: RuntimeEnv,
    destroy_image: Option<String>,
    build_env: BTreeMap<String, String>,
    output_mode: OutputMode,
}

impl RemoteDestroyer {
    pub fn new(
        builder: Arc<dyn Builder>,
        clients: Arc<dyn MetadataClientProvider>,
        session: ClusterSession,
        runtime: RuntimeEnv,
    ) -> Self {
        Self {
            builder,
            metadata: ClusterMetadataProvider::new(clients),
            stager: WorkspaceStager::new(),
            working_dir: Arc::new(OsWorkingDirectory),
            log: ExecutionLog::new(),
            session,
            runtime,
            destroy_image: None,
            build_env: BTreeMap::new(),
            output_mode: OutputMode::Destroy,
        }
    }

    /// Base image for the destroy stage; defaults to the cluster's runner image
    pub fn with_destroy_image(mut self, image: impl Into<String>) -> Self {
        let image = image.into();
        self.destroy_image = (!image.is_empty()).then_some(image);
        self
    }

    /// Extra variables baked into the destroy stage
    pub fn with_build_env(mut self, build_env: BTreeMap<String, String>) -> Self {
        self.build_env = build_env;
        self
    }

    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_stager(mut self, stager: WorkspaceStager) -> Self {
        self.stager = stager;
        self
    }

    pub fn with_working_dir(mut self, working_dir: Arc<dyn WorkingDirectory>) -> Self {
        self.working_dir = working_dir;
        self
    }

    /// How the builder filters build output
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Destroy the environment through a single remote build. No retries.
    pub async fn destroy(&self, options: &DestroyOptions) -> Result<(), StagedError> {
        self.log.set_stage(Stage::Build);

        let metadata = self
            .metadata
            .fetch(&self.session)
            .await
            .map_err(|e| self.fail(StagedError::packaging(e)))?;

        let destroy_image = self
            .destroy_image
            .clone()
            .unwrap_or_else(|| metadata.runner_image.clone());
        debug!("Destroying with image {}", destroy_image);

        let cwd = self
            .working_dir
            .get()
            .map_err(|e| self.fail(StagedError::packaging(e)))?;

        let flags = destroy_flags(options);
        let context = ManifestContext::assemble(
            &self.session,
            &self.runtime,
            ManifestInputs {
                installer_image: &metadata.installer_image,
                destroy_image: &destroy_image,
                build_env: &self.build_env,
                destroy_flags: &flags,
            },
        );
        let manifest = BuildManifest::for_destroy(&context).render();

        // Dropping the workspace removes the manifest on every exit path.
        // A staging failure outranks a failure to restore the directory.
        let staged = self.stager.stage(&cwd, &manifest);
        let restored = self.working_dir.change(&cwd);
        let workspace = staged.map_err(|e| self.fail(StagedError::packaging(e)))?;
        restored.map_err(|e| self.fail(StagedError::packaging(e)))?;

        let build_options = BuildOptions::for_remote_destroy(workspace.manifest_path(), &cwd)
            .with_output_mode(self.output_mode)
            .with_build_arg(
                OKTETO_TLS_CERT_BASE64,
                general_purpose::STANDARD.encode(&metadata.certificate),
            )
            .with_build_arg(INTERNAL_SERVER_NAME, metadata.server_name.as_str());

        info!("Running destroy remotely in namespace {}", self.session.namespace);

        match self.builder.build(&build_options).await {
            Ok(()) => {
                self.log.set_stage(Stage::Done);
                self.log.add_to_buffer(LogLevel::Info, EOF_SENTINEL);
                Ok(())
            }
            Err(e) => Err(self.fail(classify_build_error(e))),
        }
    }

    fn fail(&self, error: StagedError) -> StagedError {
        warn!("Remote destroy failed at stage {}: {}", error.stage, error);
        self.log.set_stage(error.stage.clone());
        error
    }
}
