use std::time::Duration;

use safebox::container::ContainerError;
use safebox::runner::{RunError, ValidationError};
use safebox::types::MAX_CODE_BYTES;
use safebox::RunRequest;
use serde_json::json;

use super::{ShellRuntime, leftover_entries, shell_runner};

#[tokio::test]
async fn test_result_value() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new(r#"printf '{"score": 42}' > "$RESULT_PATH""#))
        .await
        .expect("execution failed");

    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.result.value(), Some(&json!({"score": 42})));
}

#[tokio::test]
async fn test_result_missing() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new("true"))
        .await
        .expect("execution failed");

    assert_eq!(response.result.error(), Some("result artifact not found"));
}

#[tokio::test]
async fn test_result_invalid_keeps_outcome() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let code = "echo 'not json' > \"$RESULT_PATH\"\necho wrote\necho note >&2";
    let response = runner
        .execute(RunRequest::new(code))
        .await
        .expect("execution failed");

    assert!(response.result.error().unwrap().starts_with("invalid result: "));
    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.stdout, "wrote\n");
    assert_eq!(response.stderr, "note\n");
}

#[tokio::test]
async fn test_partial_result_survives_timeout() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let code = r#"printf '{"progress": 1}' > "$RESULT_PATH"; sleep 30"#;
    let response = runner
        .execute(RunRequest::new(code).timeout_ms(1_000))
        .await
        .expect("execution failed");

    assert!(response.timed_out);
    assert_eq!(response.result.value(), Some(&json!({"progress": 1})));
}

#[tokio::test]
async fn test_response_json_shape() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new("echo hi"))
        .await
        .expect("execution failed");

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "exitCode": 0,
            "timedOut": false,
            "stdout": "hi\n",
            "stderr": "",
            "result": {"error": "result artifact not found"}
        })
    );
}

#[tokio::test]
async fn test_oversized_code_rejected_before_launch() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    let code = format!("# {}", "x".repeat(MAX_CODE_BYTES));
    let err = runner.execute(RunRequest::new(code)).await.unwrap_err();

    assert!(err.is_client_error());
    assert!(matches!(
        err,
        RunError::Validation(ValidationError::CodeTooLarge { .. })
    ));
    assert_eq!(runtime.launches(), 0);
    assert!(leftover_entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_zero_timeout_rejected() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    let err = runner
        .execute(RunRequest::new("true").timeout_ms(0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Validation(ValidationError::InvalidTimeout(0))
    ));
    assert_eq!(runtime.launches(), 0);
}

#[tokio::test]
async fn test_launch_failure_tears_down_workspace() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::unavailable();
    let runner = shell_runner(root.path(), runtime.clone());

    let err = runner
        .execute(RunRequest::new("echo never"))
        .await
        .unwrap_err();

    assert!(!err.is_client_error());
    assert!(matches!(
        err,
        RunError::Launch(ContainerError::CreateFailed { .. })
    ));
    assert_eq!(runtime.removes(), 0);
    assert!(leftover_entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_workspaces_removed_for_every_outcome() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    for code in ["echo ok", "exit 3", "kill -SEGV $$", "echo nope > \"$RESULT_PATH\""] {
        runner
            .execute(RunRequest::new(code))
            .await
            .expect("execution failed");
        assert!(
            leftover_entries(root.path()).is_empty(),
            "workspace left behind by {code:?}"
        );
    }
    assert_eq!(runtime.launches(), 4);
    assert_eq!(runtime.removes(), 4);
}

#[tokio::test]
async fn test_aborted_job_removes_container_and_workspace() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    let handle = tokio::spawn(async move { runner.execute(RunRequest::new("sleep 30")).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    assert_eq!(runtime.launches(), 1);
    assert_eq!(runtime.removes(), 1);
    assert!(leftover_entries(root.path()).is_empty());
}

#[tokio::test]
async fn test_signal_exit_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let runner = shell_runner(root.path(), ShellRuntime::shared());

    let response = runner
        .execute(RunRequest::new("kill -KILL $$"))
        .await
        .expect("execution failed");

    assert!(!response.timed_out);
    assert_eq!(response.exit_code, Some(137));
}

#[tokio::test]
async fn test_concurrent_jobs_are_independent() {
    let root = tempfile::tempdir().unwrap();
    let runtime = ShellRuntime::shared();
    let runner = shell_runner(root.path(), runtime.clone());

    let mut handles = Vec::new();
    for n in 0..6 {
        let runner = runner.clone();
        let code = format!("sleep 0.2\necho job-{n}\nprintf '{{\"n\": {n}}}' > \"$RESULT_PATH\"");
        handles.push(tokio::spawn(async move {
            runner.execute(RunRequest::new(code)).await
        }));
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let response = handle.await.unwrap().expect("execution failed");
        assert_eq!(response.exit_code, Some(0));
        assert_eq!(response.stdout, format!("job-{n}\n"));
        assert_eq!(response.result.value(), Some(&json!({"n": n})));
    }

    assert_eq!(runtime.launches(), 6);
    assert_eq!(runtime.removes(), 6);
    assert!(leftover_entries(root.path()).is_empty());
}
