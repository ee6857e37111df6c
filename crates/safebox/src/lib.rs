//! A library for sandboxed code execution.
//!
//! Safebox runs untrusted source code inside a locked-down container and
//! returns what happened: exit code, captured output, whether the job timed
//! out, and an optional structured result the guest wrote to a well-known
//! path.
//!
//! # Features
//!
//! - **Fixed isolation policy**: one CPU, 256 MB memory, 128 pids, no
//!   network, read-only root, non-root user with every capability dropped.
//! - **Job-scoped workspaces**: fresh input and output directories per job,
//!   removed on every exit path.
//! - **Deadlock-free supervision**: stdin is written while stdout and stderr
//!   are drained, each capped at 1 MB.
//! - **Hard timeouts**: the whole container is killed when the budget runs
//!   out, and the response says so explicitly.
//! - **Pluggable runtime**: the Docker CLI backend sits behind the
//!   [`ContainerRuntime`] trait.
//!
//! # Example
//!
//! ```no_run
//! use safebox::{Config, RunRequest, Runner};
//!
//! # async fn run() -> Result<(), safebox::RunError> {
//! let runner = Runner::new(Config::default());
//! let response = runner
//!     .execute(RunRequest::new("print('hello')").timeout_ms(5_000))
//!     .await?;
//! assert_eq!(response.stdout, "hello\n");
//! # Ok(())
//! # }
//! ```

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, FileName, GuestConfig};
pub use container::{ContainerError, ContainerProcess, ContainerRuntime, DockerRuntime, IsolationSpec};
pub use runner::{ExecuteError, RunError, RunRequest, RunResponse, Runner, ValidationError};
pub use types::{
    ExecutionOutcome, IsolationPolicy, Job, JobId, MountConfig, NetworkMode, StructuredResult,
};
pub use workspace::{Workspace, WorkspaceError};

pub mod config;
pub mod container;
pub mod runner;
pub mod types;
pub mod workspace;
