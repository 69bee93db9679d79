// ABOUTME: Ephemeral workspace holding the rendered build manifest
// ABOUTME: Stages the manifest and ignore rules in a temp dir and removes them afterwards

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

/// File name of the manifest inside the workspace
pub const MANIFEST_FILE_NAME: &str = "deploy";

/// Ignore rules specific to remote runs, read from the build context
pub const DEPLOY_IGNORE_FILE: &str = ".oktetodeployignore";

/// Name the ignore rules are staged under
pub const DOCKER_IGNORE_FILE: &str = ".dockerignore";

const TEMP_DIR_PREFIX: &str = "teardown-";

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("failed to resolve the current working directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    #[error("failed to change directory to {path}: {source}")]
    ChangeDirectory { path: PathBuf, source: io::Error },

    #[error("failed to create temporary build folder: {0}")]
    CreateDir(#[source] io::Error),

    #[error("failed to create {path}: {source}")]
    WriteManifest { path: PathBuf, source: io::Error },

    #[error("failed to stage ignore file {path}: {source}")]
    IgnoreFile { path: PathBuf, source: io::Error },
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Process working directory access
pub trait WorkingDirectory: Send + Sync {
    fn get(&self) -> WorkspaceResult<PathBuf>;
    fn change(&self, path: &Path) -> WorkspaceResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsWorkingDirectory;

impl WorkingDirectory for OsWorkingDirectory {
    fn get(&self) -> WorkspaceResult<PathBuf> {
        std::env::current_dir().map_err(WorkspaceError::WorkingDirectory)
    }

    fn change(&self, path: &Path) -> WorkspaceResult<()> {
        std::env::set_current_dir(path).map_err(|source| WorkspaceError::ChangeDirectory {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A staged workspace. Dropping it removes the manifest and the folder.
#[derive(Debug)]
pub struct EphemeralWorkspace {
    dir: TempDir,
    manifest_path: PathBuf,
}

impl EphemeralWorkspace {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }
}

impl Drop for EphemeralWorkspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.manifest_path) {
            if e.kind() != io::ErrorKind::NotFound {
                info!(
                    "failed to remove build manifest {}: {}",
                    self.manifest_path.display(),
                    e
                );
            }
        }
    }
}

/// Creates ephemeral workspaces under the system temp dir or a fixed root
#[derive(Debug, Default, Clone)]
pub struct WorkspaceStager {
    temp_root: Option<PathBuf>,
}

impl WorkspaceStager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temp_root(root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: Some(root.into()),
        }
    }

    fn create_dir(&self) -> WorkspaceResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_DIR_PREFIX);
        match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(WorkspaceError::CreateDir)
    }

    /// Write the manifest and copy the context's remote ignore rules
    pub fn stage(&self, context: &Path, manifest: &str) -> WorkspaceResult<EphemeralWorkspace> {
        let dir = self.create_dir()?;
        let manifest_path = dir.path().join(MANIFEST_FILE_NAME);

        write_private(&manifest_path, manifest.as_bytes()).map_err(|source| {
            WorkspaceError::WriteManifest {
                path: manifest_path.clone(),
                source,
            }
        })?;

        // Hand the guard over before copying so a failure below still cleans up
        let workspace = EphemeralWorkspace { dir, manifest_path };

        copy_ignore_file(
            &context.join(DEPLOY_IGNORE_FILE),
            &workspace.dir().join(DOCKER_IGNORE_FILE),
        )?;

        debug!("Staged build workspace at {}", workspace.dir().display());
        Ok(workspace)
    }
}

/// Copy ignore rules if the source exists; a missing source is not an error
pub fn copy_ignore_file(source: &Path, destination: &Path) -> WorkspaceResult<()> {
    let contents = match fs::read(source) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No {} found, nothing to ignore", source.display());
            return Ok(());
        }
        Err(e) => {
            return Err(WorkspaceError::IgnoreFile {
                path: source.to_path_buf(),
                source: e,
            })
        }
    };

    write_private(destination, &contents).map_err(|e| WorkspaceError::IgnoreFile {
        path: destination.to_path_buf(),
        source: e,
    })
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stage_writes_manifest() {
        let root = tempdir().unwrap();
        let context = tempdir().unwrap();
        let stager = WorkspaceStager::with_temp_root(root.path());

        let workspace = stager.stage(context.path(), "FROM alpine\n").unwrap();

        assert!(workspace.dir().starts_with(root.path()));
        assert_eq!(
            workspace.manifest_path().file_name().unwrap(),
            MANIFEST_FILE_NAME
        );
        assert_eq!(
            fs::read_to_string(workspace.manifest_path()).unwrap(),
            "FROM alpine\n"
        );
        assert!(!workspace.dir().join(DOCKER_IGNORE_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_manifest_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let context = tempdir().unwrap();
        let workspace = WorkspaceStager::new().stage(context.path(), "FROM alpine\n").unwrap();

        let mode = fs::metadata(workspace.manifest_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_stage_copies_ignore_rules() {
        let context = tempdir().unwrap();
        fs::write(context.path().join(DEPLOY_IGNORE_FILE), "secrets/\n").unwrap();

        let workspace = WorkspaceStager::new().stage(context.path(), "FROM alpine\n").unwrap();

        let staged = workspace.dir().join(DOCKER_IGNORE_FILE);
        assert_eq!(fs::read_to_string(staged).unwrap(), "secrets/\n");
    }

    #[test]
    fn test_drop_removes_workspace() {
        let context = tempdir().unwrap();
        let workspace = WorkspaceStager::new().stage(context.path(), "FROM alpine\n").unwrap();
        let manifest = workspace.manifest_path().to_path_buf();
        let dir = workspace.dir().to_path_buf();

        drop(workspace);

        assert!(!manifest.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_manifest() {
        let context = tempdir().unwrap();
        let workspace = WorkspaceStager::new().stage(context.path(), "FROM alpine\n").unwrap();
        fs::remove_file(workspace.manifest_path()).unwrap();

        drop(workspace);
    }

    #[test]
    fn test_copy_ignore_file_missing_source() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join(DOCKER_IGNORE_FILE);

        copy_ignore_file(&dir.path().join(DEPLOY_IGNORE_FILE), &destination).unwrap();

        assert!(!destination.exists());
    }

    #[test]
    fn test_copy_ignore_file_unreadable_source() {
        let dir = tempdir().unwrap();
        // A directory cannot be read as a file
        let source = dir.path().join(DEPLOY_IGNORE_FILE);
        fs::create_dir(&source).unwrap();

        let result = copy_ignore_file(&source, &dir.path().join(DOCKER_IGNORE_FILE));

        assert!(matches!(result, Err(WorkspaceError::IgnoreFile { .. })));
    }

    #[test]
    fn test_stage_fails_without_temp_root() {
        let root = tempdir().unwrap();
        let stager = WorkspaceStager::with_temp_root(root.path().join("missing"));

        let result = stager.stage(root.path(), "FROM alpine\n");

        assert!(matches!(result, Err(WorkspaceError::CreateDir(_))));
    }

    #[test]
    fn test_os_working_directory_roundtrip() {
        let cwd = OsWorkingDirectory.get().unwrap();
        OsWorkingDirectory.change(&cwd).unwrap();
        assert_eq!(OsWorkingDirectory.get().unwrap(), cwd);
    }
}
