//! Configuration file loading for Safebox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError};
use crate::types::NetworkMode;

/// Prefix for environment overrides, e.g. `SAFEBOX_KILL_GRACE_MS=2000` or
/// `SAFEBOX_GUEST__IMAGE=sandbox:3.12`
const ENV_PREFIX: &str = "SAFEBOX";

/// Engine networks with unrestricted egress or the host's own stack
const GENERAL_EGRESS_NETWORKS: &[&str] = &["host", "bridge", "default"];

impl Config {
    /// Load configuration from a file, with `SAFEBOX_*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let guest = &self.guest;

        if let Some(root) = &self.workspace_root
            && !root.is_absolute()
        {
            return Err(ConfigError::Invalid(format!(
                "workspace_root '{}' must be an absolute path",
                root.display()
            )));
        }
        if let NetworkMode::AllowList(name) = &self.network
            && (GENERAL_EGRESS_NETWORKS.contains(&name.as_str()) || name.starts_with("container:"))
        {
            return Err(ConfigError::Invalid(format!(
                "network '{name}' allows general egress; use \"none\" or an allow-list network"
            )));
        }

        if guest.image.is_empty() {
            return Err(ConfigError::Invalid("guest image is empty".to_string()));
        }
        if guest.command.is_empty() {
            return Err(ConfigError::Invalid("guest command is empty".to_string()));
        }
        for (name, target) in [
            ("input_target", &guest.input_target),
            ("output_target", &guest.output_target),
        ] {
            if !target.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "guest {name} '{target}' must be an absolute path"
                )));
            }
        }
        if guest.input_target.trim_end_matches('/') == guest.output_target.trim_end_matches('/') {
            return Err(ConfigError::Invalid(
                "guest input_target and output_target must differ".to_string(),
            ));
        }
        if guest.result_path_env.is_empty() {
            return Err(ConfigError::Invalid(
                "guest result_path_env is empty".to_string(),
            ));
        }
        if self.kill_grace_ms == 0 {
            return Err(ConfigError::Invalid(
                "kill_grace_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
