use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::guest::{DEFAULT_IMAGE, DEFAULT_RESULT_PATH_ENV, FileName, GuestConfig};
use crate::types::NetworkMode;

pub mod guest;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../safebox.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid file name '{0}': must be a bare name without '/' or '..'")]
    InvalidFileName(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Operator configuration for Safebox.
///
/// None of these values can be set by the submitter of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the container CLI (uses PATH if not specified).
    #[serde(default)]
    pub docker_path: Option<PathBuf>,

    /// Parent directory for job workspaces (OS temp dir if not specified).
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Network attachment for guest containers.
    #[serde(default)]
    pub network: NetworkMode,

    /// Grace period after a timeout kill, in milliseconds.
    ///
    /// Bounds both the container engine's kill/remove calls and the wait for
    /// the attached client to exit and its pipes to drain.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Guest image, command and mount layout
    #[serde(default)]
    pub guest: GuestConfig,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with built-in defaults only
    pub fn empty() -> Self {
        Self {
            docker_path: None,
            workspace_root: None,
            network: NetworkMode::Disabled,
            kill_grace_ms: default_kill_grace_ms(),
            guest: GuestConfig::default(),
        }
    }

    /// Get the path to the container CLI
    pub fn docker_binary(&self) -> PathBuf {
        self.docker_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docker"))
    }

    /// Get the directory job workspaces are created under
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Get the timeout grace period
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_kill_grace_ms() -> u64 {
    5_000
}
