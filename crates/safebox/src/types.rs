use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest accepted source submission in bytes
pub const MAX_CODE_BYTES: usize = 200_000;

/// Largest accepted stdin payload in bytes
pub const MAX_STDIN_BYTES: usize = 1_000_000;

/// Per-stream capture cap for stdout and stderr in bytes
pub const MAX_OUTPUT_BYTES: usize = 1_000_000;

/// Largest result artifact that will be read back in bytes
pub const MAX_RESULT_BYTES: u64 = 1_000_000;

/// Appended to a captured stream once it exceeds [`MAX_OUTPUT_BYTES`]
pub const TRUNCATION_MARKER: &[u8] = b"\n[truncated]\n";

/// Timeout used when the request does not name one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Lower clamp for requested timeouts
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Upper clamp for requested timeouts
pub const MAX_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Fixed isolation policy applied to every job.
///
/// These values form the security boundary and are deliberately not part of
/// the operator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IsolationPolicy {
    /// CPU share in cores
    pub cpus: f64,

    /// Memory ceiling in megabytes (swap pinned to the same value)
    pub memory_mb: u64,

    /// Container-level process/thread ceiling
    pub pids_limit: u32,

    /// `RLIMIT_NOFILE` inside the container
    pub nofile: u32,

    /// `RLIMIT_NPROC` inside the container, kept below `pids_limit`
    pub nproc: u32,

    /// Size of the `/tmp` scratch mount in megabytes
    pub tmp_size_mb: u64,

    /// Size of the `/run` scratch mount in megabytes
    pub run_size_mb: u64,

    /// Unprivileged uid:gid the guest runs as (nobody:nogroup)
    pub uid: u32,
    pub gid: u32,
}

impl IsolationPolicy {
    pub const FIXED: IsolationPolicy = IsolationPolicy {
        cpus: 1.0,
        memory_mb: 256,
        pids_limit: 128,
        nofile: 256,
        nproc: 64,
        tmp_size_mb: 64,
        run_size_mb: 16,
        uid: 65534,
        gid: 65534,
    };

    /// Scratch mounts as `(target, size_mb)` pairs
    pub fn scratch_mounts(&self) -> [(&'static str, u64); 2] {
        [("/tmp", self.tmp_size_mb), ("/run", self.run_size_mb)]
    }
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Network attachment for a guest container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkMode {
    /// No network interfaces besides loopback
    #[default]
    Disabled,

    /// Attach to an operator-managed network that enforces an egress allow-list
    AllowList(String),
}

impl NetworkMode {
    /// Value passed to the container engine's `--network` flag
    pub fn as_flag(&self) -> &str {
        match self {
            NetworkMode::Disabled => "none",
            NetworkMode::AllowList(name) => name,
        }
    }
}

impl From<String> for NetworkMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "none" => NetworkMode::Disabled,
            _ => NetworkMode::AllowList(value),
        }
    }
}

impl From<NetworkMode> for String {
    fn from(value: NetworkMode) -> Self {
        value.as_flag().to_string()
    }
}

/// A host directory bind-mounted into the guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Source path on the host
    pub source: PathBuf,

    /// Target path in the container
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    pub writable: bool,
}

/// Unique identifier for a job.
///
/// Also used to derive the container name and the workspace directory names,
/// so uniqueness here is what keeps jobs from sharing resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Container name used for this job
    pub fn container_name(&self) -> String {
        format!("safebox-{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One accepted execution request
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source: Vec<u8>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// What happened to the guest process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Exit code; `None` exactly when `timed_out` is set
    pub exit_code: Option<i32>,

    /// Whether the wall-clock budget expired and the container was killed
    pub timed_out: bool,

    /// Captured stdout, capped and possibly ending in [`TRUNCATION_MARKER`]
    pub stdout: Vec<u8>,

    /// Captured stderr, capped and possibly ending in [`TRUNCATION_MARKER`]
    pub stderr: Vec<u8>,
}

impl ExecutionOutcome {
    /// Check if the guest exited on its own with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Structured result read back from the guest's result artifact.
///
/// Serializes as `{"value": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuredResult {
    Value(serde_json::Value),
    Error(String),
}

impl StructuredResult {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            StructuredResult::Value(value) => Some(value),
            StructuredResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StructuredResult::Value(_) => None,
            StructuredResult::Error(message) => Some(message),
        }
    }
}
