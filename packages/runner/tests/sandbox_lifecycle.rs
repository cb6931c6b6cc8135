// ABOUTME: Integration tests for the complete sandbox lifecycle against the local provider
// ABOUTME: Covers prepare, start, exec, logs, stop, failure reporting and unknown session ids

use pretty_assertions::assert_eq;
use sandbox_runner::{
    LocalProvider, RunnerError, RunnerOptions, SandboxRunner, SessionStatus, StartOptions,
    TransportStage,
};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Bundle directory with a dependency folder that must not be shipped
fn bundle() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create bundle dir");
    fs::write(dir.path().join("package.json"), r#"{"name":"app"}"#).unwrap();
    fs::write(dir.path().join("server.sh"), "echo booting on $PORT; sleep 10\n").unwrap();
    fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
    fs::write(dir.path().join("node_modules/dep/index.js"), "x").unwrap();
    dir
}

fn options() -> RunnerOptions {
    RunnerOptions {
        default_port: 4111,
        default_start_command: "sh server.sh".to_string(),
        default_timeout: Duration::from_secs(1),
        install_command: None,
        log_path: "server.log".to_string(),
        probe_interval: Duration::from_millis(100),
        probe_attempt_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn runner_with(options: RunnerOptions) -> SandboxRunner {
    SandboxRunner::new(Arc::new(LocalProvider::new()), options)
}

/// Test the full happy path: start → exec → logs → stop
///
/// This test verifies:
/// 1. start prepares a session when none is pending and reaches Running
/// 2. The session has a URL, port and start time
/// 3. exec returns output and exit code as data
/// 4. get_logs returns the server output
/// 5. stop removes the session; a second stop is NotFound
#[tokio::test]
async fn test_start_exec_logs_stop() {
    let dir = bundle();
    let runner = runner_with(options());

    let session = runner
        .start(StartOptions::new(dir.path()))
        .await
        .expect("start should succeed");

    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.port, Some(4111));
    assert_eq!(session.url.as_deref(), Some("http://localhost:4111"));
    assert!(session.started_at.is_some());

    let result = runner.exec(&session.id, "echo hi", None).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.output.contains("hi"));

    let failed = runner.exec(&session.id, "exit 5", None).await.unwrap();
    assert_eq!(failed.exit_code, 5);

    let shipped = runner.exec(&session.id, "ls", None).await.unwrap();
    assert!(shipped.output.contains("package.json"));
    assert!(!shipped.output.contains("node_modules"));
    assert!(!shipped.output.contains("bundle.tar.gz"));

    let logs = runner.get_logs(&session.id, None).await.unwrap();
    assert!(logs.contains("booting on 4111"), "unexpected logs: {:?}", logs);

    runner.stop(&session.id).await.unwrap();
    assert!(runner.get_status(&session.id).await.is_none());
    assert!(matches!(
        runner.stop(&session.id).await,
        Err(RunnerError::NotFound(_))
    ));
}

/// Whether a pid names a live, non-zombie process
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .map_or(false, |state| state != 'Z'),
        Err(_) => false,
    }
}

/// Test that stop terminates the server and everything it spawned
///
/// The start command runs in a subshell, so the server process is a
/// descendant of the shell the provider launched, not its direct child.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_kills_server_process_tree() {
    let dir = bundle();
    let runner = runner_with(options());

    let mut start = StartOptions::new(dir.path());
    start.start_command = Some("sh -c 'echo $$ > server.pid; exec sleep 4242'".to_string());
    let session = runner.start(start).await.unwrap();

    let pid: u32 = runner
        .exec(&session.id, "cat server.pid", None)
        .await
        .unwrap()
        .output
        .trim()
        .parse()
        .expect("server.pid should hold the server pid");
    assert!(process_alive(pid));

    runner.stop(&session.id).await.unwrap();

    let mut gone = false;
    for _ in 0..40 {
        if !process_alive(pid) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "server process {} survived stop", pid);
}

/// Test that start reuses a pending session prepared for the same port
#[tokio::test]
async fn test_start_reuses_pending_session() {
    let dir = bundle();
    let runner = runner_with(options());

    let prepared = runner
        .prepare(dir.path(), HashMap::new(), Some(4200))
        .await
        .unwrap();
    assert_eq!(prepared.status, SessionStatus::Pending);
    assert_eq!(
        runner.get_status(&prepared.id).await.unwrap().status,
        SessionStatus::Pending
    );

    let mut start = StartOptions::new(dir.path());
    start.port = Some(4200);
    let started = runner.start(start).await.unwrap();

    assert_eq!(started.id, prepared.id);
    assert_eq!(runner.list().await.len(), 1);

    runner.stop(&started.id).await.unwrap();
}

/// Test that concurrent start calls never share a pending session
#[tokio::test]
async fn test_concurrent_starts_get_distinct_sessions() {
    let dir = bundle();
    let runner = Arc::new(runner_with(options()));

    runner
        .prepare(dir.path(), HashMap::new(), None)
        .await
        .unwrap();

    let first = {
        let runner = runner.clone();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move { runner.start(StartOptions::new(path)).await })
    };
    let second = {
        let runner = runner.clone();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move { runner.start(StartOptions::new(path)).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_ne!(first.id, second.id);

    runner.stop(&first.id).await.unwrap();
    runner.stop(&second.id).await.unwrap();
}

/// Test that a server that exits with an error flips the session to Error
#[tokio::test]
async fn test_crashed_server_marks_session_error() {
    let dir = bundle();
    let runner = runner_with(options());

    let mut start = StartOptions::new(dir.path());
    start.start_command = Some("echo fatal: boom; exit 3".to_string());
    let session = runner.start(start).await.unwrap();

    // The crash is reported by the detached task; it never becomes Running
    assert_eq!(session.status, SessionStatus::Error);
    assert!(session.started_at.is_none());

    let logs = runner.get_logs(&session.id, Some(10)).await.unwrap();
    assert!(logs.contains("fatal: boom"));

    runner.stop(&session.id).await.unwrap();
}

/// Test that injected variables reach the server process
#[tokio::test]
async fn test_server_receives_connection_env() {
    let dir = bundle();
    let runner = runner_with(options());

    let mut start = StartOptions::new(dir.path());
    start.start_command = Some(
        "echo \"$SERVER_PROTOCOL://$SERVER_HOST:$SERVER_PORT $GREETING\"; sleep 10".to_string(),
    );
    start.env_vars = HashMap::from([("GREETING".to_string(), "hello there".to_string())]);
    let session = runner.start(start).await.unwrap();

    let logs = runner.get_logs(&session.id, None).await.unwrap();
    assert!(
        logs.contains("http://localhost:4111 hello there"),
        "unexpected logs: {:?}",
        logs
    );

    runner.stop(&session.id).await.unwrap();
}

/// Test that invalid env var names are rejected before any environment is created
#[tokio::test]
async fn test_invalid_env_name_is_validation_error() {
    let dir = bundle();
    let runner = runner_with(options());

    let mut start = StartOptions::new(dir.path());
    start.env_vars = HashMap::from([("BAD;NAME".to_string(), "x".to_string())]);

    assert!(matches!(
        runner.start(start).await,
        Err(RunnerError::Validation(_))
    ));
    assert!(runner.list().await.is_empty());
}

/// Test that get_logs returns an empty string before any log exists
#[tokio::test]
async fn test_logs_empty_when_missing() {
    let dir = bundle();
    let runner = runner_with(options());

    let session = runner
        .prepare(dir.path(), HashMap::new(), None)
        .await
        .unwrap();
    assert_eq!(runner.get_logs(&session.id, None).await.unwrap(), "");

    runner.stop(&session.id).await.unwrap();
}

/// Test that a failed install keeps the environment for the caller by default
#[tokio::test]
async fn test_prepare_failure_leaves_session_in_error() {
    let dir = bundle();
    let mut options = options();
    options.install_command = Some("echo 'npm ERR! code E404'; exit 4".to_string());
    let runner = runner_with(options);

    let err = runner
        .prepare(dir.path(), HashMap::new(), None)
        .await
        .unwrap_err();

    let session_id = match err {
        RunnerError::TransportFailure {
            session_id,
            stage,
            exit_code,
            output,
        } => {
            assert_eq!(stage, TransportStage::Install);
            assert_eq!(exit_code, 4);
            assert!(output.contains("npm ERR! code E404"));
            session_id
        }
        other => panic!("unexpected error: {}", other),
    };

    assert_eq!(
        runner.get_status(&session_id).await.unwrap().status,
        SessionStatus::Error
    );
    runner.stop(&session_id).await.unwrap();
    assert!(runner.get_status(&session_id).await.is_none());
}

/// Test that cleanup_on_prepare_failure deletes the environment and forgets the session
#[tokio::test]
async fn test_prepare_failure_cleanup() {
    let dir = bundle();
    let mut options = options();
    options.install_command = Some("exit 1".to_string());
    options.cleanup_on_prepare_failure = true;
    let runner = runner_with(options);

    let err = runner
        .prepare(dir.path(), HashMap::new(), None)
        .await
        .unwrap_err();

    let RunnerError::TransportFailure { session_id, .. } = err else {
        panic!("expected transport failure, got {}", err);
    };
    assert!(runner.get_status(&session_id).await.is_none());
    assert!(runner.list().await.is_empty());
}

/// Test that every operation on an unknown id fails fast
#[tokio::test]
async fn test_unknown_session_ids() {
    let runner = runner_with(options());

    assert!(runner.get_status("missing").await.is_none());
    assert!(matches!(
        runner.exec("missing", "true", None).await,
        Err(RunnerError::NotFound(id)) if id == "missing"
    ));
    assert!(matches!(
        runner.get_logs("missing", None).await,
        Err(RunnerError::NotFound(_))
    ));
    assert!(matches!(
        runner.stop("missing").await,
        Err(RunnerError::NotFound(_))
    ));
}
