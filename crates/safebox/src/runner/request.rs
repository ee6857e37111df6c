//! Request validation and response shape
//!
//! A [`RunRequest`] is what a caller submits; [`RunRequest::validate`] checks
//! every constraint before anything is allocated and produces the [`Job`]
//! the coordinator runs. [`RunResponse`] is the JSON document handed back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::output::decode_capped;
use crate::types::{
    DEFAULT_TIMEOUT, ExecutionOutcome, Job, JobId, MAX_CODE_BYTES, MAX_OUTPUT_BYTES,
    MAX_STDIN_BYTES, MAX_TIMEOUT, MIN_TIMEOUT, StructuredResult,
};

/// A request that violates one of the submission constraints
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("code is {size} bytes, exceeding the {limit} byte limit")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("stdin is {size} bytes, exceeding the {limit} byte limit")]
    StdinTooLarge { size: usize, limit: usize },

    #[error("invalid timeout: {0}ms")]
    InvalidTimeout(u64),
}

/// An execution request as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Source code to run
    pub code: String,

    /// Data written to the guest's stdin
    #[serde(default)]
    pub stdin: Option<String>,

    /// Wall-clock budget in milliseconds (default 60000, clamped to [1000, 60000])
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    /// Set the stdin payload
    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Set the timeout in milliseconds
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Check every constraint and turn the request into a job
    pub fn validate(self) -> Result<Job, ValidationError> {
        if self.code.len() > MAX_CODE_BYTES {
            return Err(ValidationError::CodeTooLarge {
                size: self.code.len(),
                limit: MAX_CODE_BYTES,
            });
        }
        if let Some(stdin) = &self.stdin
            && stdin.len() > MAX_STDIN_BYTES
        {
            return Err(ValidationError::StdinTooLarge {
                size: stdin.len(),
                limit: MAX_STDIN_BYTES,
            });
        }
        let timeout = clamp_timeout(self.timeout_ms)?;

        Ok(Job {
            id: JobId::new(),
            source: self.code.into_bytes(),
            stdin: self.stdin.map(String::into_bytes),
            timeout,
        })
    }
}

/// Resolve a requested timeout
///
/// `None` means the default; zero is rejected; anything else is clamped into
/// [`MIN_TIMEOUT`, `MAX_TIMEOUT`].
pub fn clamp_timeout(timeout_ms: Option<u64>) -> Result<Duration, ValidationError> {
    match timeout_ms {
        None => Ok(DEFAULT_TIMEOUT),
        Some(0) => Err(ValidationError::InvalidTimeout(0)),
        Some(ms) => Ok(Duration::from_millis(ms).clamp(MIN_TIMEOUT, MAX_TIMEOUT)),
    }
}

/// The response document for one executed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Guest exit code; `null` when the job timed out
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub result: StructuredResult,
}

impl RunResponse {
    /// Combine an execution outcome with the collected result
    ///
    /// Output that is not valid UTF-8 is converted lossily, and each stream
    /// still fits within [`MAX_OUTPUT_BYTES`] plus the truncation marker.
    pub fn new(outcome: ExecutionOutcome, result: StructuredResult) -> Self {
        Self {
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            stdout: decode_capped(&outcome.stdout, MAX_OUTPUT_BYTES),
            stderr: decode_capped(&outcome.stderr, MAX_OUTPUT_BYTES),
            result,
        }
    }
}
