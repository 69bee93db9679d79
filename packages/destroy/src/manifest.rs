// ABOUTME: Build manifest synthesis for the remote destroy image
// ABOUTME: Assembles typed stages and instructions and serializes them to Dockerfile syntax

use once_cell::sync::Lazy;
use rand::{rngs::OsRng, Rng};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use teardown_config::constants::{
    INTERNAL_SERVER_NAME, OKTETO_ACTION_NAME, OKTETO_CONTEXT, OKTETO_DEPLOY_REMOTE,
    OKTETO_GIT_COMMIT, OKTETO_INVALIDATE_CACHE, OKTETO_NAMESPACE, OKTETO_TLS_CERT_BASE64,
    OKTETO_TOKEN,
};
use teardown_config::{ClusterSession, RuntimeEnv};

/// Repository of the image that ships the CLI binary
pub const CLI_IMAGE_REPOSITORY: &str = "okteto/okteto";

/// Nonces are drawn from `0..CACHE_NONCE_RANGE`
pub const CACHE_NONCE_RANGE: u32 = 1000;

const CERTS_IMAGE: &str = "alpine";
const CLI_STAGE: &str = "okteto-cli";
const INSTALLER_STAGE: &str = "installer";
const CERTS_STAGE: &str = "certs";
const DEPLOY_STAGE: &str = "deploy";

const BIN_DIR: &str = "/okteto/bin";
const SRC_DIR: &str = "/okteto/src";
const CERTS_DIR: &str = "/etc/ssl/certs";
const CLUSTER_CERT_PATH: &str = "/etc/ssl/certs/okteto.crt";

static RELEASE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+").expect("release version pattern is valid"));

static LAST_NONCE: AtomicU32 = AtomicU32::new(u32::MAX);

/// Image reference for the CLI binary used inside the build.
///
/// Release versions pin the matching image. Anything else uses the override
/// when one is set, and the `latest` tag otherwise.
pub fn resolve_cli_version(version: &str, image_override: Option<&str>) -> String {
    if RELEASE_VERSION.is_match(version) {
        return format!("{}:{}", CLI_IMAGE_REPOSITORY, version);
    }

    match image_override.filter(|image| !image.is_empty()) {
        Some(image) => image.to_string(),
        None => format!("{}:latest", CLI_IMAGE_REPOSITORY),
    }
}

/// Draw a cache-busting nonce from the OS random source.
///
/// Two consecutive draws in the same process never return the same value.
pub fn cache_nonce() -> u32 {
    loop {
        let nonce = OsRng.gen_range(0..CACHE_NONCE_RANGE);
        if LAST_NONCE.swap(nonce, Ordering::SeqCst) != nonce {
            return nonce;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `ENV key value`
    Env { key: String, value: String },
    /// `ENV PATH="${PATH}:<dir>"`
    AppendPath(String),
    /// `ARG name` or `ARG name=default`
    Arg {
        name: String,
        default: Option<String>,
    },
    Copy {
        from: Option<String>,
        src: String,
        dest: String,
    },
    Workdir(String),
    Run(String),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Env { key, value } => write!(f, "ENV {} {}", key, value),
            Instruction::AppendPath(dir) => write!(f, "ENV PATH=\"${{PATH}}:{}\"", dir),
            Instruction::Arg {
                name,
                default: Some(default),
            } => write!(f, "ARG {}={}", name, default),
            Instruction::Arg {
                name,
                default: None,
            } => write!(f, "ARG {}", name),
            Instruction::Copy {
                from: Some(from),
                src,
                dest,
            } => write!(f, "COPY --from={} {} {}", from, src, dest),
            Instruction::Copy {
                from: None,
                src,
                dest,
            } => write!(f, "COPY {} {}", src, dest),
            Instruction::Workdir(dir) => write!(f, "WORKDIR {}", dir),
            Instruction::Run(command) => write!(f, "RUN {}", command),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStage {
    pub image: String,
    pub alias: String,
    pub instructions: Vec<Instruction>,
}

impl BuildStage {
    pub fn new(image: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            alias: alias.into(),
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    pub fn env(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.push(Instruction::Env {
            key: key.to_string(),
            value: value.into(),
        })
    }

    /// Adds the binding only when the value is non-empty
    pub fn env_if_present(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        match value.filter(|v| !v.is_empty()) {
            Some(value) => self.env(key, value),
            None => self,
        }
    }

    pub fn copy_from(&mut self, stage: &str, src: &str, dest: &str) -> &mut Self {
        self.push(Instruction::Copy {
            from: Some(stage.to_string()),
            src: src.to_string(),
            dest: dest.to_string(),
        })
    }

    pub fn run(&mut self, command: impl Into<String>) -> &mut Self {
        self.push(Instruction::Run(command.into()))
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FROM {} as {}", self.image, self.alias)?;
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

/// Everything the destroy manifest is rendered from
#[derive(Clone, PartialEq, Eq)]
pub struct ManifestContext {
    pub cli_image: String,
    pub installer_image: String,
    pub destroy_image: String,
    /// Extra build-time variables, emitted sorted by key
    pub build_env: BTreeMap<String, String>,
    pub context_name: String,
    pub namespace: String,
    pub token: String,
    pub action_name: Option<String>,
    pub git_commit: Option<String>,
    pub cache_nonce: u32,
    pub destroy_flags: String,
}

impl fmt::Debug for ManifestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestContext")
            .field("cli_image", &self.cli_image)
            .field("installer_image", &self.installer_image)
            .field("destroy_image", &self.destroy_image)
            .field("build_env", &self.build_env.keys().collect::<Vec<_>>())
            .field("context_name", &self.context_name)
            .field("namespace", &self.namespace)
            .field("token", &"<redacted>")
            .field("action_name", &self.action_name)
            .field("git_commit", &self.git_commit)
            .field("cache_nonce", &self.cache_nonce)
            .field("destroy_flags", &self.destroy_flags)
            .finish()
    }
}

/// Inputs for [`ManifestContext::assemble`] that come from the run itself
pub struct ManifestInputs<'a> {
    pub installer_image: &'a str,
    pub destroy_image: &'a str,
    pub build_env: &'a BTreeMap<String, String>,
    pub destroy_flags: &'a [String],
}

impl ManifestContext {
    /// Assemble the context right before rendering; draws a fresh nonce.
    /// Without a configured CLI version the build is treated as a development one.
    pub fn assemble(
        session: &ClusterSession,
        runtime: &RuntimeEnv,
        inputs: ManifestInputs<'_>,
    ) -> Self {
        Self {
            cli_image: resolve_cli_version(
                runtime.cli_version.as_deref().unwrap_or_default(),
                runtime.cli_image_override.as_deref(),
            ),
            installer_image: inputs.installer_image.to_string(),
            destroy_image: inputs.destroy_image.to_string(),
            build_env: inputs.build_env.clone(),
            context_name: session.context_name.clone(),
            namespace: session.namespace.clone(),
            token: session.token.clone(),
            action_name: runtime.action_name.clone(),
            git_commit: runtime.git_commit.clone(),
            cache_nonce: cache_nonce(),
            destroy_flags: inputs.destroy_flags.join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildManifest {
    stages: Vec<BuildStage>,
}

impl BuildManifest {
    /// Manifest whose final stage runs the destroy against the cluster
    pub fn for_destroy(ctx: &ManifestContext) -> Self {
        let cli = BuildStage::new(&ctx.cli_image, CLI_STAGE);
        let installer = BuildStage::new(&ctx.installer_image, INSTALLER_STAGE);

        let mut certs = BuildStage::new(CERTS_IMAGE, CERTS_STAGE);
        certs.run("apk update && apk add ca-certificates");

        let mut deploy = BuildStage::new(&ctx.destroy_image, DEPLOY_STAGE);
        deploy
            .push(Instruction::AppendPath(BIN_DIR.to_string()))
            .copy_from(CERTS_STAGE, CERTS_DIR, CERTS_DIR)
            .copy_from(INSTALLER_STAGE, "/app/bin/*", &format!("{}/", BIN_DIR))
            .copy_from(CLI_STAGE, "/usr/local/bin/*", &format!("{}/", BIN_DIR));

        for (key, value) in &ctx.build_env {
            deploy.env(key, value.as_str());
        }

        deploy
            .env_if_present(OKTETO_NAMESPACE, Some(ctx.namespace.as_str()))
            .env_if_present(OKTETO_CONTEXT, Some(ctx.context_name.as_str()))
            .env_if_present(OKTETO_TOKEN, Some(ctx.token.as_str()))
            .env(OKTETO_DEPLOY_REMOTE, "true")
            .env_if_present(OKTETO_ACTION_NAME, ctx.action_name.as_deref())
            .env_if_present(OKTETO_GIT_COMMIT, ctx.git_commit.as_deref())
            .push(Instruction::Copy {
                from: None,
                src: ".".to_string(),
                dest: SRC_DIR.to_string(),
            })
            .push(Instruction::Workdir(SRC_DIR.to_string()))
            .env(OKTETO_INVALIDATE_CACHE, ctx.cache_nonce.to_string())
            .push(Instruction::Arg {
                name: OKTETO_TLS_CERT_BASE64.to_string(),
                default: None,
            })
            .push(Instruction::Arg {
                name: INTERNAL_SERVER_NAME.to_string(),
                default: Some("\"\"".to_string()),
            })
            .run(format!(
                "echo \"${}\" | base64 -d > {}",
                OKTETO_TLS_CERT_BASE64, CLUSTER_CERT_PATH
            ))
            .run(destroy_command(&ctx.destroy_flags));

        Self {
            stages: vec![cli, installer, certs, deploy],
        }
    }

    pub fn render(&self) -> String {
        self.stages
            .iter()
            .map(|stage| stage.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn destroy_command(flags: &str) -> String {
    let mut command = format!(
        "okteto destroy --log-output=json --server-name=\"${}\"",
        INTERNAL_SERVER_NAME
    );
    if !flags.is_empty() {
        command.push(' ');
        command.push_str(flags);
    }
    command
}
