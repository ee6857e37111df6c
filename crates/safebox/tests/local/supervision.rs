use std::time::{Duration, Instant};

use safebox::RunRequest;
use safebox::types::{MAX_OUTPUT_BYTES, MAX_STDIN_BYTES, TRUNCATION_MARKER};

use super::{ShellRuntime, leftover_entries, shell_runner};

#[tokio::test]
async fn test_hello() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    let response = runner
        .execute(RunRequest::new("echo hello"))
        .await
        .expect("execution failed");

    assert_eq!(response.exit_code, Some(0));
    assert!(!response.timed_out);
    assert_eq!(response.stdout, "hello\n");
    assert_eq!(response.stderr, "");
    assert_eq!(runtime.launches(), 1);
    assert_eq!(runtime.removes(), 1);
    assert_eq!(runtime.kills(), 0);
}

#[tokio::test]
async fn test_guest_failure_is_data() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new("echo 'Traceback: boom' >&2\nexit 1"))
        .await
        .expect("guest failure must not be an error");

    assert_eq!(response.exit_code, Some(1));
    assert!(!response.timed_out);
    assert!(response.stderr.contains("boom"));
}

#[tokio::test]
async fn test_timeout_kills_whole_group() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    // The background sleep would hold the pipes open if only the shell died
    let request = RunRequest::new("echo started\nsleep 30 &\nsleep 30").timeout_ms(1_000);
    let started = Instant::now();
    let response = runner.execute(request).await.expect("execution failed");

    assert!(response.timed_out);
    assert_eq!(response.exit_code, None);
    assert_eq!(response.stdout, "started\n");
    // Timeout plus the grace period, with slack for a loaded machine
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(runtime.kills(), 1);
    assert_eq!(runtime.launches(), runtime.removes());
}

#[tokio::test]
async fn test_short_timeout_is_clamped_up() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    // 1ms is raised to the 1000ms floor, which is plenty for this guest
    let response = runner
        .execute(RunRequest::new("sleep 0.2; echo done").timeout_ms(1))
        .await
        .expect("execution failed");

    assert!(!response.timed_out);
    assert_eq!(response.stdout, "done\n");
}

#[tokio::test]
async fn test_stdin_is_delivered() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new("cat").stdin("line one\nline two\n"))
        .await
        .expect("execution failed");

    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.stdout, "line one\nline two\n");
}

#[tokio::test]
async fn test_full_stdin_and_stdout_do_not_deadlock() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    // Far more than a pipe buffer in both directions at once
    let input = "y".repeat(MAX_STDIN_BYTES);
    let response = runner
        .execute(RunRequest::new("cat").stdin(input.clone()).timeout_ms(20_000))
        .await
        .expect("execution failed");

    assert!(!response.timed_out);
    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.stdout.len(), MAX_STDIN_BYTES);
    assert_eq!(response.stdout, input);
}

#[tokio::test]
async fn test_output_is_truncated_per_stream() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let code = "head -c 3000000 /dev/zero | tr '\\0' a\nhead -c 2000000 /dev/zero | tr '\\0' b >&2";
    let response = runner
        .execute(RunRequest::new(code).timeout_ms(20_000))
        .await
        .expect("execution failed");

    let marker = std::str::from_utf8(TRUNCATION_MARKER).unwrap();
    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.stdout.len(), MAX_OUTPUT_BYTES + marker.len());
    assert!(response.stdout.ends_with(marker));
    assert!(response.stdout.starts_with("aaaa"));
    assert_eq!(response.stderr.len(), MAX_OUTPUT_BYTES + marker.len());
    assert!(response.stderr.ends_with(marker));
}

#[tokio::test]
async fn test_invalid_utf8_output_stays_within_cap() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    // Every 0xFF byte decodes to a three-byte replacement character
    let code = "head -c 2000000 /dev/zero | tr '\\0' '\\377'";
    let response = runner
        .execute(RunRequest::new(code).timeout_ms(20_000))
        .await
        .expect("execution failed");

    let marker = std::str::from_utf8(TRUNCATION_MARKER).unwrap();
    assert_eq!(response.exit_code, Some(0));
    assert!(response.stdout.len() <= MAX_OUTPUT_BYTES + marker.len());
    assert!(response.stdout.ends_with(marker));
    assert!(response.stdout.starts_with('\u{FFFD}'));
}

#[tokio::test]
async fn test_output_at_cap_is_not_truncated() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let code = format!("head -c {MAX_OUTPUT_BYTES} /dev/zero | tr '\\0' a");
    let response = runner
        .execute(RunRequest::new(code).timeout_ms(20_000))
        .await
        .expect("execution failed");

    assert_eq!(response.stdout.len(), MAX_OUTPUT_BYTES);
    assert!(!response.stdout.contains("[truncated]"));
}

#[tokio::test]
async fn test_workspace_removed_after_timeout() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new("sleep 30").timeout_ms(1_000))
        .await
        .expect("execution failed");

    assert!(response.timed_out);
    assert!(leftover_entries(root.path()).is_empty());
}
