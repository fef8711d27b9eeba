use crate::partition::SplitMode;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the raw Augustus output of every chunk.
pub const OUTPUT_DIR: &str = "augustus";
pub const LOG_DIR: &str = "logs";
/// The merged result, at the root of the workspace.
pub const MERGED_FILE: &str = "augustus.gff";
/// Append-only list of every command line launched.
pub const COMMAND_LOG: &str = "augustus.cmds";
pub const RUN_SUMMARY: &str = "run_summary.json";

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("directory {0} already exists. please remove it before launching parallel_augustus")]
    AlreadyExists(PathBuf),

    #[error("path to {0} does not exist")]
    PathNotFound(PathBuf),

    #[error("insufficient permissions to write output directory {0}")]
    PermissionDenied(PathBuf),

    #[error("could not create directory {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            ErrorKind::AlreadyExists => WorkspaceError::AlreadyExists(path),
            ErrorKind::NotFound => WorkspaceError::PathNotFound(path),
            ErrorKind::PermissionDenied => WorkspaceError::PermissionDenied(path),
            _ => WorkspaceError::Io { path, source },
        }
    }
}

/// The directory tree owned by one run of the pipeline.
///
/// ```text
/// <root>/
///   chunks/    chunk_<n>.fasta   (entries/entry_<n>.fasta in entries mode)
///   augustus/  chunk_<n>.gff
///   logs/      augustus.cmds, augustus_<n>.e, run_summary.json
///   augustus.gff
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub inputs: PathBuf,
    pub outputs: PathBuf,
    pub logs: PathBuf,
    pub merged: PathBuf,
}

impl Workspace {
    /// Creates `root` and its subdirectories. `root` must not exist yet, so that results of
    /// an earlier run are never mixed with new ones; its parent must exist.
    ///
    /// All paths of the returned workspace are absolute.
    pub fn create(root: impl AsRef<Path>, mode: SplitMode) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        let root =
            std::path::absolute(root).map_err(|source| WorkspaceError::from_io(root, source))?;

        std::fs::create_dir(&root).map_err(|e| WorkspaceError::from_io(&root, e))?;

        let workspace = Workspace {
            inputs: root.join(mode.dir_name()),
            outputs: root.join(OUTPUT_DIR),
            logs: root.join(LOG_DIR),
            merged: root.join(MERGED_FILE),
            root,
        };

        for dir in [&workspace.inputs, &workspace.outputs, &workspace.logs] {
            std::fs::create_dir(dir).map_err(|source| WorkspaceError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(workspace)
    }

    pub fn command_log(&self) -> PathBuf {
        self.logs.join(COMMAND_LOG)
    }

    pub fn run_summary(&self) -> PathBuf {
        self.logs.join(RUN_SUMMARY)
    }

    /// Where Augustus writes the predictions for the split file named `stem`.
    pub fn output_for(&self, stem: &str) -> PathBuf {
        self.outputs.join(format!("{stem}.gff"))
    }

    /// Where the standard error of Augustus goes for the split file named `stem`.
    pub fn log_for(&self, stem: &str) -> PathBuf {
        let stem = stem.strip_prefix("chunk_").unwrap_or(stem);
        self.logs.join(format!("augustus_{stem}.e"))
    }
}
