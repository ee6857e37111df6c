//! Container runtime abstraction
//!
//! This module turns a job into an [`IsolationSpec`] and hands it to a
//! [`ContainerRuntime`], which owns the mechanics of creating, attaching to,
//! killing and removing the isolated process. The default backend shells out
//! to the Docker CLI; other engines or sandboxing APIs can be substituted by
//! implementing the trait.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

pub use crate::container::command::{DockerAction, DockerCommand};
pub use crate::container::docker::DockerRuntime;
pub use crate::container::spec::IsolationSpec;
use crate::types::MountConfig;

mod command;
mod docker;
mod spec;

/// Errors that occur while driving the container engine
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to create container {name}: {message}")]
    CreateFailed { name: String, message: String },

    #[error("failed to kill container {name}: {message}")]
    KillFailed { name: String, message: String },

    #[error("failed to remove container {name}: {message}")]
    RemoveFailed { name: String, message: String },

    #[error("container command did not finish within {0:?}")]
    CommandTimedOut(Duration),

    #[error("failed to spawn container command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to run an [`IsolationSpec`] as an isolated process.
///
/// `launch` must either return a running process or fail without leaving a
/// container behind. `kill` and `remove` address the container by name and
/// must terminate everything inside it, not just the attached client.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start the container, with stdio attached as pipes
    async fn launch(&self, spec: &IsolationSpec) -> Result<ContainerProcess, ContainerError>;

    /// Forcibly terminate every process in the container
    async fn kill(&self, name: &str) -> Result<(), ContainerError>;

    /// Remove the container; succeeds if it is already gone
    async fn remove(&self, name: &str) -> Result<(), ContainerError>;

    /// Start removing the container without waiting for the engine
    ///
    /// Used from `Drop` when a supervised run is abandoned before its own
    /// cleanup ran. Failures are only logged.
    fn remove_detached(&self, name: &str);
}

#[async_trait]
impl<T: ContainerRuntime + ?Sized> ContainerRuntime for Arc<T> {
    async fn launch(&self, spec: &IsolationSpec) -> Result<ContainerProcess, ContainerError> {
        (**self).launch(spec).await
    }

    async fn kill(&self, name: &str) -> Result<(), ContainerError> {
        (**self).kill(name).await
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        (**self).remove(name).await
    }

    fn remove_detached(&self, name: &str) {
        (**self).remove_detached(name)
    }
}

/// Handle to a launched container's attached client process
#[derive(Debug)]
pub struct ContainerProcess {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ContainerProcess {
    /// Wrap a spawned child whose stdio was configured as pipes
    pub fn new(name: impl Into<String>, mut child: Child) -> Self {
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Self {
            name: name.into(),
            child,
            stdin,
            stdout,
            stderr,
        }
    }

    /// Container name this process is attached to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take ownership of stdin
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take ownership of stdout
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take ownership of stderr
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the attached process to exit. Cancel-safe.
    pub async fn wait(&mut self) -> Result<ExitStatus, ContainerError> {
        Ok(self.child.wait().await?)
    }

    /// Send SIGKILL to the attached client process only.
    ///
    /// This does not stop the container itself; use
    /// [`ContainerRuntime::kill`] for that.
    pub fn start_kill(&mut self) -> Result<(), ContainerError> {
        Ok(self.child.start_kill()?)
    }
}

/// Validate that all mount source paths exist
///
/// Container engines differ on whether a missing bind source is an error or
/// silently created, so this is checked up front.
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), ContainerError> {
    for mount in mounts {
        if !mount.source.is_dir() {
            return Err(ContainerError::MountSourceNotFound(mount.source.clone()));
        }
    }
    Ok(())
}
