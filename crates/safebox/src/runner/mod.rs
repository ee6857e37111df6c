//! Job coordination for Safebox
//!
//! Provides the high-level API that takes a request from validation through
//! workspace setup, supervised execution and result collection to teardown.

use thiserror::Error;
use tracing::{debug, instrument};

pub use crate::runner::collect::collect;
pub use crate::runner::output::OutputBuffer;
pub use crate::runner::request::{RunRequest, RunResponse, ValidationError, clamp_timeout};
pub use crate::runner::supervise::supervise;

mod collect;
mod output;
mod request;
mod supervise;

use crate::config::Config;
use crate::container::{ContainerError, ContainerRuntime, DockerRuntime, IsolationSpec};
use crate::types::Job;
use crate::workspace::{Workspace, WorkspaceError};

/// Errors that occur while supervising a container
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The runtime could not start the guest
    #[error("failed to launch container: {0}")]
    Launch(#[source] ContainerError),

    /// The guest started but could not be waited on
    #[error("failed to supervise container: {0}")]
    Supervise(#[source] ContainerError),
}

/// Errors that abort a run
///
/// Timeouts, guest crashes and bad result artifacts are not errors; they are
/// reported inside the [`RunResponse`].
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to prepare workspace: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("failed to launch container: {0}")]
    Launch(#[source] ContainerError),

    #[error("execution failed: {0}")]
    Execute(#[source] ExecuteError),
}

impl RunError {
    /// Whether the caller is at fault (as opposed to the host)
    pub fn is_client_error(&self) -> bool {
        matches!(self, RunError::Validation(_))
    }
}

impl From<ExecuteError> for RunError {
    fn from(e: ExecuteError) -> Self {
        match e {
            ExecuteError::Launch(e) => RunError::Launch(e),
            other => RunError::Execute(other),
        }
    }
}

/// High-level runner for code execution
#[derive(Debug, Clone)]
pub struct Runner<R = DockerRuntime> {
    config: Config,
    runtime: R,
}

impl Runner {
    /// Create a new runner backed by the Docker CLI
    pub fn new(config: Config) -> Self {
        let runtime = DockerRuntime::from_config(&config);
        Self { config, runtime }
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }
}

impl<R: ContainerRuntime> Runner<R> {
    /// Create a runner with a custom container runtime
    pub fn with_runtime(config: Config, runtime: R) -> Self {
        Self { config, runtime }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the container runtime
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Validate a request and run it
    ///
    /// Nothing is allocated for a request that fails validation.
    pub async fn execute(&self, request: RunRequest) -> Result<RunResponse, RunError> {
        let job = request.validate()?;
        self.run_job(job).await
    }

    /// Run an already validated job
    ///
    /// The workspace is torn down on every path out of this function.
    #[instrument(skip_all, fields(job = %job.id))]
    pub async fn run_job(&self, job: Job) -> Result<RunResponse, RunError> {
        let root = self.config.workspace_root();
        let mut workspace = Workspace::prepare(&root, &job.id).await?;

        let result = self.run_in_workspace(&job, &workspace).await;
        workspace.teardown().await;

        if let Ok(response) = &result {
            debug!(
                exit_code = ?response.exit_code,
                timed_out = response.timed_out,
                "job finished"
            );
        }
        result
    }

    async fn run_in_workspace(
        &self,
        job: &Job,
        workspace: &Workspace,
    ) -> Result<RunResponse, RunError> {
        let guest = &self.config.guest;

        workspace.write_source(&guest.source_name, &job.source).await?;
        let spec = IsolationSpec::build(&job.id, workspace, &self.config);

        let outcome = supervise(
            &self.runtime,
            &spec,
            job.stdin.as_deref(),
            job.timeout,
            self.config.kill_grace(),
        )
        .await?;

        // The guest is gone, so a partial artifact from a killed job is final
        let result = collect(workspace.output_dir(), &guest.result_file).await;

        Ok(RunResponse::new(outcome, result))
    }
}
