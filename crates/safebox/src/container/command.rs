//! Command builder for the Docker CLI
//!
//! Builds command-line arguments for creating, attaching to, killing and
//! removing guest containers.

use std::path::{Path, PathBuf};

use crate::container::spec::IsolationSpec;

/// Builder for Docker command-line arguments
#[derive(Debug)]
pub struct DockerCommand<'a> {
    /// Path to the Docker binary
    docker_path: PathBuf,
    /// Container name every action addresses
    container: String,
    action: DockerAction<'a>,
}

/// Docker subcommand to issue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DockerAction<'a> {
    /// `docker create` from a full isolation spec
    Create(&'a IsolationSpec),
    /// `docker start --attach --interactive`
    Start,
    /// `docker kill --signal=KILL`
    Kill,
    /// `docker rm --force`
    Remove,
}

impl<'a> DockerCommand<'a> {
    /// Create a new docker command builder
    pub fn new(docker_path: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
            container: container.into(),
            action: DockerAction::Start,
        }
    }

    /// `docker create` for the given spec, named after it
    pub fn create(docker_path: impl Into<PathBuf>, spec: &'a IsolationSpec) -> Self {
        Self::new(docker_path, spec.name()).action(DockerAction::Create(spec))
    }

    /// Set the action to perform
    pub fn action(mut self, action: DockerAction<'a>) -> Self {
        self.action = action;
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self; the first element is the program.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.docker_path.to_string_lossy().into_owned()];

        match self.action {
            DockerAction::Create(spec) => {
                args.push("create".to_string());
                args.push(format!("--name={}", self.container));
                for (key, value) in spec.labels() {
                    args.push(format!("--label={key}={value}"));
                }
                // Keep stdin open so `start --interactive` can feed it
                args.push("--interactive".to_string());
                // A missing image is a launch failure, never a pull
                args.push("--pull=never".to_string());

                // Network
                args.push(format!("--network={}", spec.network().as_flag()));

                // Resource limits
                let policy = spec.policy();
                args.push(format!("--cpus={}", policy.cpus));
                args.push(format!("--memory={}m", policy.memory_mb));
                args.push(format!("--memory-swap={}m", policy.memory_mb));
                args.push(format!("--pids-limit={}", policy.pids_limit));
                args.push(format!("--ulimit=nofile={0}:{0}", policy.nofile));
                args.push(format!("--ulimit=nproc={0}:{0}", policy.nproc));

                // Filesystem
                args.push("--read-only".to_string());
                for (target, size_mb) in policy.scratch_mounts() {
                    args.push(format!(
                        "--tmpfs={target}:rw,noexec,nosuid,nodev,size={size_mb}m"
                    ));
                }
                for mount in spec.mounts() {
                    let mut opt = format!(
                        "--mount=type=bind,source={},target={}",
                        mount.source.display(),
                        mount.target
                    );
                    if !mount.writable {
                        opt.push_str(",readonly");
                    }
                    args.push(opt);
                }

                // Identity and privileges
                args.push(format!("--user={}:{}", policy.uid, policy.gid));
                args.push("--cap-drop=ALL".to_string());
                args.push("--security-opt=no-new-privileges".to_string());

                // Environment
                for (key, value) in spec.env() {
                    args.push(format!("--env={key}={value}"));
                }

                args.push(format!("--workdir={}", spec.workdir()));

                // Image and command
                args.push(spec.image().to_string());
                args.extend(spec.command().iter().cloned());
            }
            DockerAction::Start => {
                args.push("start".to_string());
                args.push("--attach".to_string());
                args.push("--interactive".to_string());
                args.push(self.container);
            }
            DockerAction::Kill => {
                args.push("kill".to_string());
                args.push("--signal=KILL".to_string());
                args.push(self.container);
            }
            DockerAction::Remove => {
                args.push("rm".to_string());
                args.push("--force".to_string());
                args.push("--volumes".to_string());
                args.push(self.container);
            }
        }

        args
    }

    /// Get the docker binary path
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    /// Get the container name
    pub fn container(&self) -> &str {
        &self.container
    }
}
