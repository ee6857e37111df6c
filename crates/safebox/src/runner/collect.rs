//! Result artifact collection
//!
//! Reads the guest's result artifact back from the output directory. Every
//! failure here is reported inside the [`StructuredResult`], never as an
//! error: a guest that writes nothing or writes garbage has still run.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::config::FileName;
use crate::types::{MAX_RESULT_BYTES, StructuredResult};

const NOT_REGULAR: &str = "result artifact is not a regular file";

fn read_failed(e: std::io::Error) -> StructuredResult {
    StructuredResult::Error(format!("failed to read result artifact: {e}"))
}

fn too_large(size: u64) -> StructuredResult {
    StructuredResult::Error(format!("result artifact too large: {size} bytes"))
}

/// Read and parse the result artifact named `file_name` in `output_dir`
#[instrument(skip(output_dir), fields(dir = %output_dir.display()))]
pub async fn collect(output_dir: &Path, file_name: &FileName) -> StructuredResult {
    let path = output_dir.join(file_name.as_str());

    // The guest controls this directory: open once without following links or
    // blocking on a FIFO, then inspect and read through the same handle
    let opened = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
        .open(&path)
        .await;
    let file = match opened {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no result artifact");
            return StructuredResult::Error("result artifact not found".to_string());
        }
        Err(e) if e.raw_os_error() == Some(libc::ELOOP) => {
            return StructuredResult::Error(NOT_REGULAR.to_string());
        }
        Err(e) => return read_failed(e),
    };

    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(e) => return read_failed(e),
    };
    if !metadata.file_type().is_file() {
        return StructuredResult::Error(NOT_REGULAR.to_string());
    }
    if metadata.len() > MAX_RESULT_BYTES {
        return too_large(metadata.len());
    }

    // The file may still grow after the size check
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    if let Err(e) = file.take(MAX_RESULT_BYTES + 1).read_to_end(&mut bytes).await {
        return read_failed(e);
    }
    if bytes.len() as u64 > MAX_RESULT_BYTES {
        return too_large(bytes.len() as u64);
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => {
            debug!(len = bytes.len(), "parsed result artifact");
            StructuredResult::Value(value)
        }
        Err(e) => StructuredResult::Error(format!("invalid result: {e}")),
    }
}
