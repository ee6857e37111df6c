//! Per-job workspace directories
//!
//! Each job gets a fresh input directory (holding the submitted source) and a
//! fresh output directory (where the guest may write its result artifact).
//! Both are named after the job id and removed when the job ends.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::FileName;
use crate::types::JobId;

/// Mode of the input directory: readable by the unprivileged guest user
const INPUT_DIR_MODE: u32 = 0o755;

/// Mode of the output directory: the guest runs as a different uid and must
/// be able to create the artifact
const OUTPUT_DIR_MODE: u32 = 0o777;

/// Mode of the written source file
const SOURCE_FILE_MODE: u32 = 0o644;

/// Errors that occur while preparing a workspace
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write source file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The pair of job-scoped directories mounted into a guest
///
/// # Cleanup
///
/// Call [`teardown()`](Self::teardown) when the job ends. It never fails and
/// is safe to call more than once. Dropping a workspace that was not torn
/// down removes the directories synchronously and logs a warning.
#[derive(Debug)]
pub struct Workspace {
    job_id: JobId,
    input_dir: PathBuf,
    output_dir: PathBuf,
    torn_down: bool,
}

impl Workspace {
    /// Create the input and output directories for `job_id` under `root`
    ///
    /// Fails if either directory already exists; directories are never shared.
    #[instrument(skip(root), fields(job = %job_id))]
    pub async fn prepare(root: &Path, job_id: &JobId) -> Result<Self, WorkspaceError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.to_path_buf(),
                source,
            })?;

        let input_dir = root.join(format!("safebox-{job_id}-input"));
        let output_dir = root.join(format!("safebox-{job_id}-output"));

        create_private_dir(&input_dir, INPUT_DIR_MODE).await?;

        // From here on the value owns the input dir, so a failure below
        // still removes it via Drop.
        let mut workspace = Self {
            job_id: job_id.clone(),
            input_dir,
            output_dir,
            torn_down: false,
        };

        if let Err(e) = create_private_dir(&workspace.output_dir, OUTPUT_DIR_MODE).await {
            workspace.teardown().await;
            return Err(e);
        }

        debug!(
            input = %workspace.input_dir.display(),
            output = %workspace.output_dir.display(),
            "workspace prepared"
        );
        Ok(workspace)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Host path of the input directory
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Host path of the output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the submitted source as the single entry file
    #[instrument(skip(self, code), fields(job = %self.job_id, len = code.len()))]
    pub async fn write_source(&self, name: &FileName, code: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let path = self.input_dir.join(name.as_str());

        let write = async {
            tokio::fs::write(&path, code).await?;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOURCE_FILE_MODE))
                .await
        };
        write.await.map_err(|source| WorkspaceError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "wrote source file");
        Ok(path)
    }

    /// Remove both directories
    ///
    /// Errors are logged, never returned.
    #[instrument(skip(self), fields(job = %self.job_id))]
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }

        for dir in [&self.input_dir, &self.output_dir] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to remove workspace directory");
                }
            }
        }

        self.torn_down = true;
        debug!("workspace removed");
    }

    /// Check if the workspace has been torn down
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }

        warn!(
            job = %self.job_id,
            "Workspace dropped without teardown, removing directories synchronously"
        );

        for dir in [&self.input_dir, &self.output_dir] {
            if let Err(e) = std::fs::remove_dir_all(dir)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %dir.display(), error = %e, "best-effort workspace removal failed");
            }
        }
    }
}

async fn create_private_dir(path: &Path, mode: u32) -> Result<(), WorkspaceError> {
    let create = async {
        tokio::fs::create_dir(path).await?;
        // Set explicitly; the process umask would otherwise mask the mode
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    };
    create.await.map_err(|source| WorkspaceError::Create {
        path: path.to_path_buf(),
        source,
    })
}
