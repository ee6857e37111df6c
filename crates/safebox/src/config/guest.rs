use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;

/// Default image the guest runs in
pub const DEFAULT_IMAGE: &str = "sandbox:latest";

/// Default environment variable naming the result artifact path
pub const DEFAULT_RESULT_PATH_ENV: &str = "RESULT_PATH";

/// Configuration for the guest container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestConfig {
    /// Image the guest runs in
    #[serde(default = "default_image")]
    pub image: String,

    /// Command and arguments run inside the container
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// File name the submitted source is written to inside the input directory
    #[serde(default = "default_source_name")]
    pub source_name: FileName,

    /// Mount point of the job's input directory
    #[serde(default = "default_input_target")]
    pub input_target: String,

    /// Mount point of the job's output directory
    #[serde(default = "default_output_target")]
    pub output_target: String,

    /// File name of the result artifact inside the output directory
    #[serde(default = "default_result_file")]
    pub result_file: FileName,

    /// Environment variable that tells the guest where to write its result
    #[serde(default = "default_result_path_env")]
    pub result_path_env: String,

    /// Extra environment variables for the guest
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl GuestConfig {
    /// Absolute path of the result artifact as seen from inside the container
    pub fn result_path(&self) -> String {
        format!(
            "{}/{}",
            self.output_target.trim_end_matches('/'),
            self.result_file
        )
    }
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            command: default_command(),
            source_name: default_source_name(),
            input_target: default_input_target(),
            output_target: default_output_target(),
            result_file: default_result_file(),
            result_path_env: default_result_path_env(),
            env: HashMap::new(),
        }
    }
}

/// A bare file name (e.g., "main.py"): no directories, no traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() || name == "." || name.contains('/') || name.contains("..") {
            return Err(ConfigError::InvalidFileName(name.to_owned()));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileName::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a non-empty file name without '/' or '..'",
            )
        })
    }
}

impl std::fmt::Display for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_owned()
}

fn default_command() -> Vec<String> {
    vec!["python".to_owned(), "/workspace/main.py".to_owned()]
}

fn default_source_name() -> FileName {
    FileName("main.py".to_owned())
}

fn default_input_target() -> String {
    "/workspace".to_owned()
}

fn default_output_target() -> String {
    "/output".to_owned()
}

fn default_result_file() -> FileName {
    FileName("result.json".to_owned())
}

fn default_result_path_env() -> String {
    DEFAULT_RESULT_PATH_ENV.to_owned()
}
