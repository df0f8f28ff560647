use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use waypost::error::TraceError;
use waypost::trace::Tracer;

/// Write an executable fake trace script and return its path.
fn fake_trace(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("fake-trace");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

fn params(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn run_returns_trimmed_combined_output() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(
        fake_trace(&dir, "echo out\necho err >&2"),
        Duration::from_secs(5),
    );

    let output = tracer.run("example.com", &[]).await.unwrap();
    assert_eq!(output, "out\nerr");
}

#[tokio::test]
async fn target_is_appended_after_params() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(fake_trace(&dir, r#"echo "$@""#), Duration::from_secs(5));

    let output = tracer.run("example.com", &params(&["--tcp", "-q1"])).await.unwrap();
    assert_eq!(output, "--tcp -q1 example.com");
}

#[tokio::test]
async fn nonzero_exit_keeps_partial_output() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(
        fake_trace(&dir, "echo partial\nexit 3"),
        Duration::from_secs(5),
    );

    let err = tracer.run("example.com", &[]).await.unwrap_err();
    match err {
        TraceError::ExecutionFailed { output, .. } => assert_eq!(output, "partial"),
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn nonzero_exit_is_not_reported_as_timeout() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(fake_trace(&dir, "exit 2"), Duration::from_secs(5));

    let err = tracer.run("example.com", &[]).await.unwrap_err();
    assert!(matches!(err, TraceError::ExecutionFailed { .. }));
}

#[tokio::test]
async fn spawn_failure_is_execution_failed() {
    let tracer = Tracer::new("/nonexistent/trace-binary", Duration::from_secs(5));

    let err = tracer.run("example.com", &[]).await.unwrap_err();
    match err {
        TraceError::ExecutionFailed { output, .. } => assert!(output.is_empty()),
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn deadline_kills_the_command_and_keeps_partial_output() {
    let dir = TempDir::new().unwrap();
    let tracer = Tracer::new(
        fake_trace(&dir, "echo started\nsleep 30"),
        Duration::from_secs(1),
    );

    let begin = Instant::now();
    let err = tracer.run("example.com", &[]).await.unwrap_err();
    let elapsed = begin.elapsed();

    match err {
        TraceError::Timeout { limit, output } => {
            assert_eq!(limit, Duration::from_secs(1));
            assert_eq!(output, "started");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    // The child must have been killed, not waited out.
    assert!(elapsed < Duration::from_secs(10));
}
