//! Per-request scratch directories for the renderer.
//!
//! Each request gets its own `plantuml-*` directory under the configured root.
//! The directory is removed by [`Workspace::release`], and by `Drop` when a
//! request unwinds or is cancelled before reaching release.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use thiserror::Error;
use tokio::task;
use tracing::debug;

const WORKSPACE_PREFIX: &str = "plantuml-";
const SOURCE_FILE_NAME: &str = "diagram.puml";
const OUTPUT_FILE_NAME: &str = "diagram.png";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to prepare workspace root `{path}`: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create workspace: {0}")]
    Create(#[source] io::Error),
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named directory for one request.
    ///
    /// Filesystem work runs on the blocking pool.
    pub async fn acquire(&self) -> Result<Workspace, WorkspaceError> {
        let root = self.root.clone();
        let dir = task::spawn_blocking(move || create_in(root))
            .await
            .map_err(|err| WorkspaceError::Create(io::Error::other(err)))??;

        debug!(
            target = "application::render::workspace",
            op = "workspace::acquire",
            path = %dir.path().display(),
            "Workspace acquired"
        );

        Ok(Workspace { dir })
    }
}

fn create_in(root: PathBuf) -> Result<TempDir, WorkspaceError> {
    fs::create_dir_all(&root).map_err(|source| WorkspaceError::Root {
        path: root.clone(),
        source,
    })?;

    tempfile::Builder::new()
        .prefix(WORKSPACE_PREFIX)
        .tempdir_in(&root)
        .map_err(WorkspaceError::Create)
}

/// Scratch directory owning the diagram source and the rendered PNG.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join(SOURCE_FILE_NAME)
    }

    /// PlantUML names its output after the input file with a `.png` extension.
    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_FILE_NAME)
    }

    /// Recursively remove the directory on the blocking pool, reporting removal failures.
    pub async fn release(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        let dir = self.dir;
        task::spawn_blocking(move || dir.close())
            .await
            .map_err(io::Error::other)??;
        debug!(
            target = "application::render::workspace",
            op = "workspace::release",
            path = %path.display(),
            "Workspace released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_creates_unique_directories_under_root() {
        let root = TempDir::new().expect("temp dir");
        let manager = WorkspaceManager::new(root.path().join("workspaces"));

        let first = manager.acquire().await.expect("first workspace");
        let second = manager.acquire().await.expect("second workspace");

        assert!(first.path().is_dir());
        assert!(second.path().is_dir());
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(manager.root()));
        let name = first
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("utf-8 name");
        assert!(name.starts_with(WORKSPACE_PREFIX));
    }

    #[tokio::test]
    async fn source_and_output_share_a_base_name() {
        let root = TempDir::new().expect("temp dir");
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .acquire()
            .await
            .expect("workspace");

        assert_eq!(workspace.source_path().file_stem(), workspace.output_path().file_stem());
        assert_eq!(
            workspace.output_path().extension().and_then(|ext| ext.to_str()),
            Some("png")
        );
        assert_eq!(workspace.source_path().parent(), Some(workspace.path()));
    }

    #[tokio::test]
    async fn release_removes_directory_and_contents() {
        let root = TempDir::new().expect("temp dir");
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .acquire()
            .await
            .expect("workspace");
        fs::write(workspace.source_path(), "@startuml\n@enduml").expect("write source");
        fs::write(workspace.output_path(), b"png").expect("write output");
        let path = workspace.path().to_path_buf();

        workspace.release().await.expect("release");

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropping_a_workspace_removes_it() {
        let root = TempDir::new().expect("temp dir");
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .acquire()
            .await
            .expect("workspace");
        let path = workspace.path().to_path_buf();

        drop(workspace);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unusable_root_is_reported() {
        let root = TempDir::new().expect("temp dir");
        let blocker = root.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("write blocker");

        let err = WorkspaceManager::new(blocker.join("nested"))
            .acquire()
            .await
            .expect_err("root cannot be created under a file");
        assert!(matches!(err, WorkspaceError::Root { .. }), "{err:?}");
    }
}
