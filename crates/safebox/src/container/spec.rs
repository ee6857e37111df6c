//! Isolation spec construction
//!
//! Translates a job and its workspace into the launch parameters of a
//! container. The policy half of the spec is the fixed
//! [`IsolationPolicy::FIXED`]; only the name, mounts and result path vary
//! per job.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::config::Config;
use crate::types::{IsolationPolicy, JobId, MountConfig, NetworkMode};
use crate::workspace::Workspace;

/// Label attached to every guest container, valued with the job id
pub const JOB_LABEL: &str = "safebox.job";

/// Immutable description of a guest container
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationSpec {
    name: String,
    job_id: JobId,
    image: String,
    command: Vec<String>,
    network: NetworkMode,
    policy: IsolationPolicy,
    workdir: String,
    mounts: Vec<MountConfig>,
    env: BTreeMap<String, String>,
}

impl IsolationSpec {
    /// Build the spec for one job
    #[instrument(skip_all, fields(job = %job_id))]
    pub fn build(job_id: &JobId, workspace: &Workspace, config: &Config) -> Self {
        let guest = &config.guest;

        let mounts = vec![
            MountConfig {
                source: workspace.input_dir().to_path_buf(),
                target: guest.input_target.clone(),
                writable: true,
            },
            MountConfig {
                source: workspace.output_dir().to_path_buf(),
                target: guest.output_target.clone(),
                writable: true,
            },
        ];

        let mut env: BTreeMap<String, String> = guest
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        env.insert("HOME".to_string(), "/tmp".to_string());
        // Inserted last so operator env cannot redirect the artifact
        env.insert(guest.result_path_env.clone(), guest.result_path());

        let spec = Self {
            name: job_id.container_name(),
            job_id: job_id.clone(),
            image: guest.image.clone(),
            command: guest.command.clone(),
            network: config.network.clone(),
            policy: IsolationPolicy::FIXED,
            workdir: guest.input_target.clone(),
            mounts,
            env,
        };

        debug!(name = %spec.name, image = %spec.image, "built isolation spec");
        spec
    }

    /// Unique container name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Command run inside the container
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn network(&self) -> &NetworkMode {
        &self.network
    }

    /// Resource ceilings, identity and scratch mounts
    pub fn policy(&self) -> &IsolationPolicy {
        &self.policy
    }

    /// Working directory inside the container
    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// The two job-scoped bind mounts: input first, output second
    pub fn mounts(&self) -> &[MountConfig] {
        &self.mounts
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Labels to attach to the container
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(JOB_LABEL.to_string(), self.job_id.to_string())])
    }
}
