// ABOUTME: Docker engine builder for the remote destroy image
// ABOUTME: Streams a tarred build context to bollard and tracks nested command stages

use super::{BuildError, BuildOptions, Builder, OutputMode};
use crate::log::{ExecutionLog, LogLevel};
use crate::workspace::DOCKER_IGNORE_FILE;
use anyhow::anyhow;
use async_trait::async_trait;
use bollard::{image::BuildImageOptions, Docker};
use futures::StreamExt;
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where the staged manifest is placed inside the context archive
pub const MANIFEST_ARCHIVE_PATH: &str = ".teardown/Dockerfile";

pub struct DockerBuilder {
    client: Docker,
    output: BuildOutput,
}

impl DockerBuilder {
    /// Connect to the local Docker engine
    pub fn new() -> Result<Self, BuildError> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| BuildError::Other(anyhow!("failed to connect to Docker: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            output: BuildOutput::default(),
        }
    }

    /// Forward command output to an execution log
    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.output = BuildOutput::new(Some(log));
        self
    }
}

/// Routes build output lines to the execution log, or to tracing without one
#[derive(Debug, Default, Clone)]
pub struct BuildOutput {
    log: Option<ExecutionLog>,
}

impl BuildOutput {
    pub fn new(log: Option<ExecutionLog>) -> Self {
        Self { log }
    }

    fn emit(&self, level: LogLevel, message: &str) {
        match &self.log {
            Some(log) => log.add_to_buffer(level, message),
            None => match level {
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn | LogLevel::Error => warn!("{}", message),
            },
        }
    }

    /// In destroy mode only lines written by the nested command are kept
    pub fn handle_line(&self, tracker: &mut StageTracker, mode: OutputMode, line: &str) {
        match tracker.observe(line) {
            Some(entry) => self.emit(LogLevel::parse(&entry.level), &entry.message),
            None if mode == OutputMode::Destroy => debug!("build: {}", line),
            None => self.emit(LogLevel::Info, line),
        }
    }
}

#[async_trait]
impl Builder for DockerBuilder {
    async fn build(&self, options: &BuildOptions) -> Result<(), BuildError> {
        let archive = create_context_archive(&options.context_path, &options.manifest_path)
            .map_err(|e| {
                BuildError::Other(anyhow::Error::new(e).context("failed to package build context"))
            })?;

        debug!(
            "Sending {} byte build context from {}",
            archive.len(),
            options.context_path.display()
        );

        let build_options = BuildImageOptions {
            dockerfile: MANIFEST_ARCHIVE_PATH.to_string(),
            rm: true,
            forcerm: true,
            buildargs: options.build_args.iter().cloned().collect::<HashMap<_, _>>(),
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(build_options, None, Some(archive.into()));
        let mut tracker = StageTracker::default();

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(chunk) = &info.stream {
                        for line in tracker.push_chunk(chunk) {
                            self.output.handle_line(&mut tracker, options.output_mode, &line);
                        }
                    }
                    if let Some(error) = info.error {
                        return Err(tracker.failure(&error));
                    }
                }
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    return Err(tracker.failure(&error));
                }
                Err(e) => {
                    return Err(BuildError::Other(
                        anyhow::Error::new(e).context("failed to run the remote build"),
                    ));
                }
            }
        }

        if let Some(line) = tracker.flush() {
            self.output.handle_line(&mut tracker, options.output_mode, &line);
        }

        Ok(())
    }
}

/// A log line written by the destroy command running inside the build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandLogLine {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub stage: String,
    pub message: String,
}

/// Follows build output and remembers the last command stage reported
#[derive(Debug, Default)]
pub struct StageTracker {
    pending: String,
    stage: Option<String>,
    last_error: Option<String>,
}

impl StageTracker {
    /// Split a stream chunk into complete lines, keeping any partial tail
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    pub fn flush(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    pub fn observe(&mut self, line: &str) -> Option<CommandLogLine> {
        let entry: CommandLogLine = serde_json::from_str(line).ok()?;
        if !entry.stage.is_empty() {
            self.stage = Some(entry.stage.clone());
        }
        if LogLevel::parse(&entry.level) == LogLevel::Error {
            self.last_error = Some(entry.message.clone());
        }
        Some(entry)
    }

    /// Error for a failed build. Failures after the command reported a stage
    /// are attributed to it, preferring the command's own error message.
    pub fn failure(&self, daemon_message: &str) -> BuildError {
        match &self.stage {
            Some(stage) => {
                let message = self.last_error.as_deref().unwrap_or(daemon_message);
                BuildError::Command {
                    stage: stage.clone(),
                    cause: anyhow!("{}", message.trim()),
                }
            }
            None => BuildError::Other(anyhow!("{}", daemon_message.trim())),
        }
    }
}

/// Exclusion rules in `.dockerignore` syntax
#[derive(Debug, Default)]
struct IgnoreRules {
    rules: Vec<(Pattern, bool)>,
}

impl IgnoreRules {
    fn parse(contents: &str) -> Self {
        let mut rules = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (negated, raw) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };
            let raw = raw.trim_start_matches("./").trim_matches('/');
            if raw.is_empty() {
                continue;
            }
            match Pattern::new(raw) {
                Ok(pattern) => rules.push((pattern, negated)),
                Err(e) => debug!("Skipping invalid ignore pattern {:?}: {}", raw, e),
            }
        }
        Self { rules }
    }

    fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// The last matching rule wins; a rule matching a parent covers its children
    fn is_excluded(&self, relative: &Path) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        let mut excluded = false;
        for (pattern, negated) in &self.rules {
            let matched = relative
                .ancestors()
                .filter(|p| !p.as_os_str().is_empty())
                .any(|p| pattern.matches_path_with(p, options));
            if matched {
                excluded = !negated;
            }
        }
        excluded
    }
}

/// Tar the build context with the manifest at [`MANIFEST_ARCHIVE_PATH`].
///
/// Ignore rules staged next to the manifest take precedence over the
/// context's own `.dockerignore`, and replace it inside the archive.
/// Symlinks are archived as links.
pub fn create_context_archive(context: &Path, manifest: &Path) -> io::Result<Vec<u8>> {
    let staged_ignore = manifest
        .parent()
        .map(|dir| dir.join(DOCKER_IGNORE_FILE))
        .filter(|path| path.is_file());

    let rules = match &staged_ignore {
        Some(path) => IgnoreRules::load(path)?,
        None => IgnoreRules::load(&context.join(DOCKER_IGNORE_FILE))?,
    };

    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);

    for entry in WalkDir::new(context).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(context)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        if staged_ignore.is_some() && relative == Path::new(DOCKER_IGNORE_FILE) {
            continue;
        }
        if relative.starts_with(MANIFEST_ARCHIVE_PATH) || rules.is_excluded(relative) {
            continue;
        }

        archive.append_path_with_name(entry.path(), relative)?;
    }

    if let Some(path) = &staged_ignore {
        archive.append_path_with_name(path, DOCKER_IGNORE_FILE)?;
    }

    let contents = fs::read(manifest)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o600);
    header.set_cksum();
    archive.append_data(&mut header, MANIFEST_ARCHIVE_PATH, contents.as_slice())?;

    archive.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use tempfile::tempdir;

    fn archive_entries(data: &[u8]) -> HashMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(data);
        let mut entries = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            entries.insert(path, contents);
        }
        entries
    }

    #[test]
    fn test_archive_contains_context_and_manifest() {
        let context = tempdir().unwrap();
        let staging = tempdir().unwrap();
        fs::write(context.path().join("okteto.yml"), "deploy: []\n").unwrap();
        fs::create_dir(context.path().join("charts")).unwrap();
        fs::write(context.path().join("charts/values.yaml"), "a: 1\n").unwrap();
        let manifest = staging.path().join("deploy");
        fs::write(&manifest, "FROM alpine\n").unwrap();

        let entries = archive_entries(&create_context_archive(context.path(), &manifest).unwrap());

        assert_eq!(entries["okteto.yml"], b"deploy: []\n".to_vec());
        assert_eq!(entries["charts/values.yaml"], b"a: 1\n".to_vec());
        assert_eq!(entries[MANIFEST_ARCHIVE_PATH], b"FROM alpine\n".to_vec());
    }

    #[test]
    fn test_staged_ignore_replaces_context_ignore() {
        let context = tempdir().unwrap();
        let staging = tempdir().unwrap();
        fs::write(context.path().join(DOCKER_IGNORE_FILE), "okteto.yml\n").unwrap();
        fs::write(context.path().join("okteto.yml"), "deploy: []\n").unwrap();
        fs::create_dir(context.path().join("secrets")).unwrap();
        fs::write(context.path().join("secrets/key"), "k").unwrap();
        fs::write(context.path().join("secrets/public"), "p").unwrap();
        fs::write(staging.path().join(DOCKER_IGNORE_FILE), "secrets/\n!secrets/public\n").unwrap();
        let manifest = staging.path().join("deploy");
        fs::write(&manifest, "FROM alpine\n").unwrap();

        let entries = archive_entries(&create_context_archive(context.path(), &manifest).unwrap());

        assert!(entries.contains_key("okteto.yml"));
        assert!(!entries.contains_key("secrets/key"));
        assert!(entries.contains_key("secrets/public"));
        assert_eq!(
            entries[DOCKER_IGNORE_FILE],
            b"secrets/\n!secrets/public\n".to_vec()
        );
    }

    #[test]
    fn test_context_ignore_applies_without_staged_rules() {
        let context = tempdir().unwrap();
        let staging = tempdir().unwrap();
        fs::write(context.path().join(DOCKER_IGNORE_FILE), "# comment\n*.log\n").unwrap();
        fs::write(context.path().join("build.log"), "noise").unwrap();
        fs::write(context.path().join("main.go"), "package main").unwrap();
        let manifest = staging.path().join("deploy");
        fs::write(&manifest, "FROM alpine\n").unwrap();

        let entries = archive_entries(&create_context_archive(context.path(), &manifest).unwrap());

        assert!(!entries.contains_key("build.log"));
        assert!(entries.contains_key("main.go"));
        assert!(entries.contains_key(DOCKER_IGNORE_FILE));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let context = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let staging = tempdir().unwrap();
        fs::write(outside.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), context.path().join("link"))
            .unwrap();
        let manifest = staging.path().join("deploy");
        fs::write(&manifest, "FROM alpine\n").unwrap();

        let data = create_context_archive(context.path(), &manifest).unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let link = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().to_string_lossy() == "link")
            .unwrap();

        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
    }

    #[test]
    fn test_tracker_records_last_stage() {
        let mut tracker = StageTracker::default();

        assert!(tracker.observe("Step 3/20 : RUN okteto destroy").is_none());
        tracker.observe(r#"{"level":"info","stage":"installer","message":"running"}"#);
        tracker.observe(r#"{"level":"info","stage":"","message":"still running"}"#);

        match tracker.failure("exit code 1") {
            BuildError::Command { stage, cause } => {
                assert_eq!(stage, "installer");
                assert_eq!(cause.to_string(), "exit code 1");
            }
            other => panic!("expected command error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_after_stage_is_command_error() {
        let mut tracker = StageTracker::default();
        tracker.observe(r#"{"level":"info","stage":"installer","message":"running"}"#);
        tracker.observe(r#"{"level":"error","stage":"installer","message":"helm uninstall failed"}"#);

        match tracker.failure("The command returned a non-zero code: 1") {
            BuildError::Command { stage, cause } => {
                assert_eq!(stage, "installer");
                assert_eq!(cause.to_string(), "helm uninstall failed");
            }
            other => panic!("expected command error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_without_stage_is_other() {
        let tracker = StageTracker::default();

        match tracker.failure("pull access denied") {
            BuildError::Other(cause) => assert_eq!(cause.to_string(), "pull access denied"),
            other => panic!("expected other error, got {:?}", other),
        }
    }

    #[test]
    fn test_push_chunk_handles_partial_lines() {
        let mut tracker = StageTracker::default();

        assert!(tracker.push_chunk("{\"level\":\"info\",").is_empty());
        let lines = tracker.push_chunk("\"message\":\"hi\"}\nStep 2/3\n\npartial");

        assert_eq!(lines, vec!["{\"level\":\"info\",\"message\":\"hi\"}", "Step 2/3"]);
        assert_eq!(tracker.flush().as_deref(), Some("partial"));
        assert_eq!(tracker.flush(), None);
    }

    #[test]
    fn test_destroy_mode_forwards_only_command_messages() {
        let log = ExecutionLog::new();
        let output = BuildOutput::new(Some(log.clone()));
        let mut tracker = StageTracker::default();

        output.handle_line(&mut tracker, OutputMode::Destroy, "Step 1/20 : FROM alpine");
        output.handle_line(
            &mut tracker,
            OutputMode::Destroy,
            r#"{"level":"warn","stage":"destroy","message":"volume kept"}"#,
        );
        output.handle_line(&mut tracker, OutputMode::Plain, "Step 2/20 : RUN true");

        let messages: Vec<(LogLevel, String)> = log
            .entries()
            .into_iter()
            .map(|e| (e.level, e.message))
            .collect();
        assert_eq!(
            messages,
            vec![
                (LogLevel::Warn, "volume kept".to_string()),
                (LogLevel::Info, "Step 2/20 : RUN true".to_string()),
            ]
        );
    }
}
