//! Broker process supervision tests
//!
//! Small shell scripts stand in for the broker so that startup failure,
//! graceful stop and forced kill can be exercised without a real broker.

use broker_itest::error::HarnessError;
use broker_itest::process::{BrokerCommand, ProcessSupervisor, SupervisorState};
use once_cell::sync::Lazy;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// Spawning a script while another test still holds a write handle to its own
// script fails with ETXTBSY, so tests in this file run one at a time
static SPAWN_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

const STARTUP_GRACE: Duration = Duration::from_millis(300);
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

fn command(executable: PathBuf, dir: &Path) -> BrokerCommand {
    BrokerCommand {
        executable,
        log_file: dir.join("itest").join("itest_server.log"),
        log_level: "trace".to_string(),
        connect_timeout: Duration::from_millis(2000),
        log_console: false,
    }
}

fn supervisor(executable: PathBuf, dir: &TempDir) -> ProcessSupervisor {
    ProcessSupervisor::new(
        "fake-broker",
        command(executable, dir.path()),
        STARTUP_GRACE,
        SHUTDOWN_GRACE,
    )
}

#[tokio::test]
async fn test_start_and_graceful_stop() {
    let _guard = SPAWN_LOCK.lock().await;

    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "broker.sh", "exec sleep 30");
    let mut supervisor = supervisor(script, &dir);

    // Act
    supervisor.start().await.unwrap();

    // Assert
    assert_eq!(supervisor.state(), &SupervisorState::Running);
    assert!(supervisor.is_started());
    assert!(supervisor.pid().is_some());

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), &SupervisorState::Stopped);
    assert!(!supervisor.is_started());
}

#[tokio::test]
async fn test_exit_during_startup_is_startup_failure() {
    let _guard = SPAWN_LOCK.lock().await;

    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "broker.sh", "exit 3");
    let mut supervisor = supervisor(script, &dir);

    // Act
    let result = supervisor.start().await;

    // Assert
    match result {
        Err(error @ HarnessError::StartupFailure { .. }) => {
            assert!(error.is_fatal());
            if let HarnessError::StartupFailure { status, .. } = error {
                assert_eq!(status.code(), Some(3));
            }
        }
        other => panic!("Expected StartupFailure, got {other:?}"),
    }
    assert!(matches!(supervisor.state(), SupervisorState::Failed(_)));
    assert!(!supervisor.is_started());

    // Stop tolerates the failed start
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), &SupervisorState::Stopped);
}

#[tokio::test]
async fn test_missing_executable_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(dir.path().join("does-not-exist"), &dir);

    let result = supervisor.start().await;

    assert!(matches!(result, Err(HarnessError::SpawnFailed { .. })));
    assert!(result.unwrap_err().is_fatal());
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_broker_ignoring_sigterm_is_killed() {
    let _guard = SPAWN_LOCK.lock().await;

    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "stubborn.sh",
        "trap '' TERM\nwhile true; do sleep 0.1; done",
    );
    let mut supervisor = supervisor(script, &dir);
    supervisor.start().await.unwrap();

    // Act
    let started = Instant::now();
    supervisor.stop().await.unwrap();

    // Assert: the grace period ran out before the kill
    assert!(started.elapsed() >= SHUTDOWN_GRACE);
    assert_eq!(supervisor.state(), &SupervisorState::Stopped);
}

#[tokio::test]
async fn test_arguments_and_log_directory() {
    let _guard = SPAWN_LOCK.lock().await;

    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let script = write_script(
        dir.path(),
        "broker.sh",
        &format!(
            "printf '%s\\n' \"$@\" > '{}'\nexec sleep 30",
            args_file.display()
        ),
    );
    let mut supervisor = supervisor(script, &dir);

    // Act
    supervisor.start().await.unwrap();
    supervisor.stop().await.unwrap();

    // Assert
    let log_file = dir.path().join("itest").join("itest_server.log");
    assert!(log_file.parent().unwrap().is_dir());

    let args = std::fs::read_to_string(&args_file).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(
        args,
        vec![
            "--log-file",
            log_file.to_str().unwrap(),
            "--log-level",
            "trace",
            "--conn-timeout",
            "2000",
        ]
    );
}

#[tokio::test]
async fn test_start_is_noop_while_running() {
    let _guard = SPAWN_LOCK.lock().await;

    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "broker.sh", "exec sleep 30");
    let mut supervisor = supervisor(script, &dir);

    supervisor.start().await.unwrap();
    let pid = supervisor.pid();
    supervisor.start().await.unwrap();

    assert_eq!(supervisor.pid(), pid);
    supervisor.stop().await.unwrap();
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_crash_after_startup_is_detected() {
    let _guard = SPAWN_LOCK.lock().await;

    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "broker.sh", "sleep 0.6\nexit 1");
    let mut supervisor = supervisor(script, &dir);

    supervisor.start().await.unwrap();
    assert!(supervisor.is_started());

    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(!supervisor.is_started());
    supervisor.stop().await.unwrap();
}
