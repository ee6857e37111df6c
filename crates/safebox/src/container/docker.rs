//! Docker CLI backend
//!
//! Launches guests with a two-step `docker create` + `docker start --attach`
//! so that engine and image failures are reported by `create` instead of
//! being confused with the guest's own exit code.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::container::command::{DockerAction, DockerCommand};
use crate::container::spec::IsolationSpec;
use crate::container::{ContainerError, ContainerProcess, ContainerRuntime, validate_mounts};

/// Upper bound for `docker create` (no image pulls happen, see `--pull=never`)
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Container runtime backed by the Docker CLI
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    /// Path to the docker binary
    docker_path: PathBuf,

    /// Upper bound for kill/remove calls
    command_timeout: Duration,
}

impl DockerRuntime {
    pub fn new(docker_path: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            docker_path: docker_path.into(),
            command_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.docker_binary(), config.kill_grace())
    }

    pub fn docker_path(&self) -> &std::path::Path {
        &self.docker_path
    }
}

/// Run a docker management command to completion within `limit`
async fn run_docker(args: Vec<String>, limit: Duration) -> Result<Output, ContainerError> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| ContainerError::SpawnFailed(std::io::ErrorKind::InvalidInput.into()))?;

    debug!(?args, "running docker command");

    let output = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(limit, output).await {
        Ok(output) => output.map_err(ContainerError::SpawnFailed),
        Err(_) => Err(ContainerError::CommandTimedOut(limit)),
    }
}

fn stderr_message(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip_all, fields(container = spec.name()))]
    async fn launch(&self, spec: &IsolationSpec) -> Result<ContainerProcess, ContainerError> {
        validate_mounts(spec.mounts())?;

        let args = DockerCommand::create(&self.docker_path, spec).build();
        let output = run_docker(args, CREATE_TIMEOUT).await?;
        if !output.status.success() {
            // A failed create can still leave a half-made container behind
            if let Err(e) = self.remove(spec.name()).await {
                debug!(error = %e, "removal after failed create");
            }
            return Err(ContainerError::CreateFailed {
                name: spec.name().to_string(),
                message: stderr_message(&output),
            });
        }

        let args = DockerCommand::new(&self.docker_path, spec.name())
            .action(DockerAction::Start)
            .build();
        debug!(?args, "starting container");

        let spawned = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => Ok(ContainerProcess::new(spec.name(), child)),
            Err(e) => {
                if let Err(remove_err) = self.remove(spec.name()).await {
                    warn!(error = %remove_err, "failed to remove container after start failure");
                }
                Err(ContainerError::SpawnFailed(e))
            }
        }
    }

    #[instrument(skip(self))]
    async fn kill(&self, name: &str) -> Result<(), ContainerError> {
        let args = DockerCommand::new(&self.docker_path, name)
            .action(DockerAction::Kill)
            .build();
        let output = run_docker(args, self.command_timeout).await?;

        if !output.status.success() {
            return Err(ContainerError::KillFailed {
                name: name.to_string(),
                message: stderr_message(&output),
            });
        }

        debug!("container killed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        let args = DockerCommand::new(&self.docker_path, name)
            .action(DockerAction::Remove)
            .build();
        let output = run_docker(args, self.command_timeout).await?;

        if !output.status.success() {
            let message = stderr_message(&output);
            if message.contains("No such container") {
                debug!("container already removed");
                return Ok(());
            }
            return Err(ContainerError::RemoveFailed {
                name: name.to_string(),
                message,
            });
        }

        debug!("container removed");
        Ok(())
    }

    fn remove_detached(&self, name: &str) {
        let args = DockerCommand::new(&self.docker_path, name)
            .action(DockerAction::Remove)
            .build();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Outside a runtime there is nothing to hand the call to
            let status = std::process::Command::new(&args[0])
                .args(&args[1..])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = status {
                warn!(container = name, error = %e, "failed to remove abandoned container");
            }
            return;
        };

        let name = name.to_string();
        let limit = self.command_timeout;
        handle.spawn(async move {
            match run_docker(args, limit).await {
                Ok(output) if output.status.success() => {
                    debug!(container = %name, "abandoned container removed");
                }
                Ok(output) => {
                    let message = stderr_message(&output);
                    if !message.contains("No such container") {
                        warn!(container = %name, %message, "failed to remove abandoned container");
                    }
                }
                Err(e) => warn!(container = %name, error = %e, "failed to remove abandoned container"),
            }
        });
    }
}
