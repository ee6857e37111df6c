//! Execution supervision
//!
//! Drives one launched container from start to removal: feeds stdin, drains
//! both output streams concurrently so the guest can never block on a full
//! pipe, and races the process against a wall-clock deadline. When the
//! deadline wins, the whole container is killed, not just the attached
//! client.

use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::container::{ContainerError, ContainerProcess, ContainerRuntime, IsolationSpec};
use crate::runner::ExecuteError;
use crate::runner::output::OutputBuffer;
use crate::types::{ExecutionOutcome, MAX_OUTPUT_BYTES};

/// Read size for the output pumps
const CHUNK_SIZE: usize = 8192;

/// Chunks in flight between the pumps and the capture loop
const CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a supervised job, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Created,
    Launched,
    Running,
    Completed,
    TimedOut,
    LaunchFailed,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Both capture buffers plus the channel feeding them
struct Capture {
    rx: mpsc::Receiver<(Stream, Vec<u8>)>,
    open: bool,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
}

impl Capture {
    fn new(rx: mpsc::Receiver<(Stream, Vec<u8>)>) -> Self {
        Self {
            rx,
            open: true,
            stdout: OutputBuffer::new(MAX_OUTPUT_BYTES),
            stderr: OutputBuffer::new(MAX_OUTPUT_BYTES),
        }
    }

    fn accept(&mut self, chunk: Option<(Stream, Vec<u8>)>) {
        match chunk {
            Some((Stream::Stdout, bytes)) => self.stdout.push(&bytes),
            Some((Stream::Stderr, bytes)) => self.stderr.push(&bytes),
            None => self.open = false,
        }
    }

    /// Capture output and reap the process until both are done or `deadline`
    ///
    /// Returns `true` if the process exited and both streams closed in time.
    async fn run_until(
        &mut self,
        process: &mut ContainerProcess,
        status: &mut Option<ExitStatus>,
        deadline: Instant,
    ) -> Result<bool, ContainerError> {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            if status.is_some() && !self.open {
                return Ok(true);
            }

            tokio::select! {
                chunk = self.rx.recv(), if self.open => self.accept(chunk),
                result = process.wait(), if status.is_none() => {
                    let exit = result?;
                    debug!(?exit, "attached process exited");
                    *status = Some(exit);
                }
                _ = &mut sleep => return Ok(false),
            }
        }
    }

    fn finish(self) -> (Vec<u8>, Vec<u8>) {
        if self.stdout.is_truncated() || self.stderr.is_truncated() {
            debug!(
                stdout_discarded = self.stdout.discarded(),
                stderr_discarded = self.stderr.discarded(),
                "output truncated"
            );
        }
        (self.stdout.into_bytes(), self.stderr.into_bytes())
    }
}

/// Run a spec to completion or timeout
///
/// Only a launch failure is an error the caller must surface as such. A
/// timeout, a non-zero exit or a crash are all reported in the returned
/// [`ExecutionOutcome`]. The container is removed before this returns,
/// whatever the outcome.
#[instrument(skip_all, fields(container = spec.name(), timeout_ms = timeout.as_millis() as u64))]
pub async fn supervise<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    spec: &IsolationSpec,
    stdin: Option<&[u8]>,
    timeout: Duration,
    grace: Duration,
) -> Result<ExecutionOutcome, ExecuteError> {
    debug!(state = ?JobState::Created);

    let mut process = match runtime.launch(spec).await {
        Ok(process) => process,
        Err(e) => {
            debug!(state = ?JobState::LaunchFailed, error = %e);
            debug!(state = ?JobState::Terminal);
            return Err(ExecuteError::Launch(e));
        }
    };
    debug!(state = ?JobState::Launched);
    let mut guard = RemovalGuard::new(runtime, spec.name());
    let deadline = Instant::now() + timeout;

    let mut tasks = Vec::with_capacity(3);
    if let Some(pipe) = process.take_stdin() {
        let data = stdin.map(<[u8]>::to_vec);
        tasks.push(tokio::spawn(feed_stdin(pipe, data)));
    }

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    if let Some(out) = process.take_stdout() {
        tasks.push(tokio::spawn(pump(out, Stream::Stdout, tx.clone())));
    }
    if let Some(err) = process.take_stderr() {
        tasks.push(tokio::spawn(pump(err, Stream::Stderr, tx.clone())));
    }
    // The channel closes once both pumps hit EOF
    drop(tx);
    debug!(state = ?JobState::Running);

    let mut capture = Capture::new(rx);
    let mut status = None;

    let finished = match capture.run_until(&mut process, &mut status, deadline).await {
        Ok(finished) => finished,
        Err(e) => {
            warn!(error = %e, "failed to wait for attached client");
            let removed = terminate(runtime, spec.name(), grace).await;
            abort_all(&tasks);
            if !removed {
                remove(runtime, spec.name(), grace).await;
            }
            guard.disarm();
            debug!(state = ?JobState::Terminal);
            return Err(ExecuteError::Supervise(e));
        }
    };

    // Whether the guest beat the deadline, even if its pipes did not close
    let exited_in_time = status.is_some();
    let mut removed = false;

    if !finished {
        if exited_in_time {
            // Something inside still holds the pipes open
            warn!("guest exited but its output streams stayed open until the deadline");
        } else {
            debug!(state = ?JobState::TimedOut);
        }

        removed = terminate(runtime, spec.name(), grace).await;
        if let Err(e) = process.start_kill() {
            debug!(error = %e, "failed to kill attached client");
        }

        // Keep whatever the guest wrote before it was killed
        let grace_deadline = Instant::now() + grace;
        match capture
            .run_until(&mut process, &mut status, grace_deadline)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("guest streams did not close within the grace period"),
            Err(e) => warn!(error = %e, "failed to reap attached client after kill"),
        }
    }

    abort_all(&tasks);

    if !removed {
        remove(runtime, spec.name(), grace).await;
    }
    guard.disarm();

    let (stdout, stderr) = capture.finish();
    let outcome = if exited_in_time {
        debug!(state = ?JobState::Completed);
        ExecutionOutcome {
            exit_code: status.map(exit_code),
            timed_out: false,
            stdout,
            stderr,
        }
    } else {
        ExecutionOutcome {
            exit_code: None,
            timed_out: true,
            stdout,
            stderr,
        }
    };

    debug!(
        exit_code = ?outcome.exit_code,
        timed_out = outcome.timed_out,
        stdout_len = outcome.stdout.len(),
        stderr_len = outcome.stderr.len(),
        "execution complete"
    );
    debug!(state = ?JobState::Terminal);

    Ok(outcome)
}

/// Removes the container if supervision is dropped before its own cleanup
///
/// Covers a caller that times out, disconnects or aborts the task while the
/// guest is still running. Killing the attached client alone would leave the
/// container behind.
struct RemovalGuard<'a, R: ContainerRuntime + ?Sized> {
    runtime: &'a R,
    name: &'a str,
    armed: bool,
}

impl<'a, R: ContainerRuntime + ?Sized> RemovalGuard<'a, R> {
    fn new(runtime: &'a R, name: &'a str) -> Self {
        Self {
            runtime,
            name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<R: ContainerRuntime + ?Sized> Drop for RemovalGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            warn!(container = self.name, "supervision abandoned, removing container");
            self.runtime.remove_detached(self.name);
        }
    }
}

/// Stop every process in the container
///
/// Tries a kill first and falls back to a forced removal once. Returns
/// `true` if the container was removed along the way. Failures are logged.
async fn terminate<R: ContainerRuntime + ?Sized>(runtime: &R, name: &str, grace: Duration) -> bool {
    match bounded(grace, runtime.kill(name)).await {
        Ok(()) => return false,
        Err(e) => warn!(error = %e, "failed to kill container, forcing removal"),
    }

    match bounded(grace, runtime.remove(name)).await {
        Ok(()) => {
            debug!("container removed");
            true
        }
        Err(e) => {
            warn!(error = %e, "forced removal failed, container may still be running");
            false
        }
    }
}

/// Remove the container, logging failures
async fn remove<R: ContainerRuntime + ?Sized>(runtime: &R, name: &str, grace: Duration) {
    match bounded(grace, runtime.remove(name)).await {
        Ok(()) => debug!("container removed"),
        Err(e) => warn!(error = %e, "failed to remove container"),
    }
}

/// Bound a runtime call so an unresponsive engine cannot stall cleanup
async fn bounded<F>(limit: Duration, call: F) -> Result<(), ContainerError>
where
    F: Future<Output = Result<(), ContainerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ContainerError::CommandTimedOut(limit)),
    }
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

/// Exit code of the attached client, with signals mapped to `128 + signo`
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Write the whole stdin payload, then close the pipe
///
/// A guest that exits without reading its input closes the pipe early;
/// that is not an error.
async fn feed_stdin(mut pipe: ChildStdin, data: Option<Vec<u8>>) {
    if let Some(data) = data {
        match pipe.write_all(&data).await {
            Ok(()) => debug!(len = data.len(), "wrote stdin"),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("guest closed stdin before reading all input");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to write stdin");
                return;
            }
        }
    }

    if let Err(e) = pipe.shutdown().await {
        debug!(error = %e, "failed to close stdin");
    }
}

/// Forward one output stream to the capture loop until EOF
async fn pump<Rd>(mut reader: Rd, stream: Stream, tx: mpsc::Sender<(Stream, Vec<u8>)>)
where
    Rd: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((stream, buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(?stream, error = %e, "output read error");
                break;
            }
        }
    }
}
