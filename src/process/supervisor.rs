//! Lifecycle of the broker-under-test process
//!
//! ```text
//! NotStarted --start ok--> Running --stop--> Stopped
//!      \--start fail--> Failed ------stop--/
//! ```
//!
//! `stop` is safe in every state, including after a failed or never-attempted
//! `start`, so suite teardown can always call it.

use crate::config::BrokerSection;
use crate::error::{HarnessError, HarnessResult};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a supervised broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    /// Exited during startup grace
    Failed(ExitStatus),
    /// Terminal
    Stopped,
}

/// Command line used to launch the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerCommand {
    pub executable: PathBuf,
    pub log_file: PathBuf,
    pub log_level: String,
    pub connect_timeout: Duration,
    pub log_console: bool,
}

impl BrokerCommand {
    pub fn from_config(broker: &BrokerSection) -> Self {
        Self {
            executable: broker.executable(),
            log_file: broker.log_file(),
            log_level: broker.log_level.clone(),
            connect_timeout: broker.connect_timeout(),
            log_console: broker.log_console,
        }
    }

    /// `--log-file <path> --log-level <level> --conn-timeout <ms> [--log-console]`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--log-file".to_string(),
            self.log_file.display().to_string(),
            "--log-level".to_string(),
            self.log_level.clone(),
            "--conn-timeout".to_string(),
            self.connect_timeout.as_millis().to_string(),
        ];
        if self.log_console {
            args.push("--log-console".to_string());
        }
        args
    }
}

/// Owns the broker subprocess
pub struct ProcessSupervisor {
    name: String,
    command: BrokerCommand,
    startup_grace: Duration,
    shutdown_grace: Duration,
    child: Option<Child>,
    state: SupervisorState,
}

impl ProcessSupervisor {
    pub fn new<S: Into<String>>(
        name: S,
        command: BrokerCommand,
        startup_grace: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            startup_grace,
            shutdown_grace,
            child: None,
            state: SupervisorState::NotStarted,
        }
    }

    pub fn from_config<S: Into<String>>(name: S, broker: &BrokerSection) -> Self {
        Self::new(
            name,
            BrokerCommand::from_config(broker),
            broker.startup_grace(),
            broker.shutdown_grace(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &BrokerCommand {
        &self.command
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// OS process id while a child is held
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the broker, wait out the startup grace, and confirm it is still alive.
    ///
    /// Calling `start` on a running supervisor is a no-op; a supervisor that
    /// failed or was stopped cannot be restarted.
    pub async fn start(&mut self) -> HarnessResult<()> {
        match self.state {
            SupervisorState::NotStarted => {}
            SupervisorState::Running => {
                debug!(name = %self.name, "Already running");
                return Ok(());
            }
            SupervisorState::Failed(_) | SupervisorState::Stopped => {
                return Err(HarnessError::SupervisorFinished {
                    name: self.name.clone(),
                });
            }
        }

        prepare_log_dir(&self.command.log_file).await?;

        let executable = self.command.executable.display().to_string();
        info!(name = %self.name, executable = %executable, args = ?self.command.args(), "Starting broker");

        let child = Command::new(&self.command.executable)
            .args(self.command.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::SpawnFailed {
                executable: executable.clone(),
                source,
            })?;
        let child = self.child.insert(child);

        tokio::time::sleep(self.startup_grace).await;

        match child.try_wait()? {
            Some(status) => {
                error!(name = %self.name, %status, "Broker exited during startup");
                self.child = None;
                self.state = SupervisorState::Failed(status);
                Err(HarnessError::StartupFailure { executable, status })
            }
            None => {
                info!(name = %self.name, pid = ?child.id(), "Broker started");
                self.state = SupervisorState::Running;
                Ok(())
            }
        }
    }

    /// Non-blocking liveness check
    pub fn is_started(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// SIGTERM, wait out the shutdown grace, SIGKILL if still alive, then reap.
    pub async fn stop(&mut self) -> HarnessResult<()> {
        let Some(mut child) = self.child.take() else {
            debug!(name = %self.name, state = ?self.state, "No broker process to stop");
            self.state = SupervisorState::Stopped;
            return Ok(());
        };

        info!(name = %self.name, "Stopping broker");

        if let Some(pid) = child.id() {
            send_terminate(pid);
        }

        tokio::time::sleep(self.shutdown_grace).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(name = %self.name, %status, "Broker exited after SIGTERM");
            }
            Ok(None) => {
                warn!(name = %self.name, grace = ?self.shutdown_grace, "Broker ignored SIGTERM, killing");
                if let Err(e) = child.start_kill() {
                    warn!(name = %self.name, "Failed to send SIGKILL: {}", e);
                }
            }
            Err(e) => {
                warn!(name = %self.name, "Liveness check failed during stop: {}", e);
            }
        }

        let status = child.wait().await?;
        self.state = SupervisorState::Stopped;
        info!(name = %self.name, %status, "Broker stopped");
        Ok(())
    }
}

fn send_terminate(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "Process id out of range for signalling");
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        // ESRCH: already gone, which stop handles on the next liveness check
        debug!(pid, "SIGTERM not delivered: {}", e);
    }
}

async fn prepare_log_dir(log_file: &Path) -> HarnessResult<()> {
    if let Some(dir) = log_file.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> BrokerCommand {
        BrokerCommand {
            executable: PathBuf::from("/opt/broker/target/debug/main/wally-iod"),
            log_file: PathBuf::from("/tmp/itest/itest_server.log"),
            log_level: "trace".to_string(),
            connect_timeout: Duration::from_millis(2000),
            log_console: false,
        }
    }

    #[test]
    fn test_command_args() {
        assert_eq!(
            command().args(),
            vec![
                "--log-file",
                "/tmp/itest/itest_server.log",
                "--log-level",
                "trace",
                "--conn-timeout",
                "2000",
            ]
        );
    }

    #[test]
    fn test_command_args_with_console() {
        let mut cmd = command();
        cmd.log_console = true;
        assert_eq!(cmd.args().last().map(String::as_str), Some("--log-console"));
    }

    #[test]
    fn test_command_from_config() {
        let broker = BrokerSection {
            build: "sanitize".to_string(),
            root_dir: PathBuf::from("/src"),
            connect_timeout_ms: 500,
            ..BrokerSection::default()
        };
        let cmd = BrokerCommand::from_config(&broker);
        assert_eq!(
            cmd.executable,
            PathBuf::from("/src/target/sanitize/main/wally-iod")
        );
        assert!(cmd.args().contains(&"500".to_string()));
    }

    #[tokio::test]
    async fn test_stop_never_started() {
        let mut supervisor = ProcessSupervisor::new(
            "idle",
            command(),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert_eq!(supervisor.state(), &SupervisorState::NotStarted);
        assert!(!supervisor.is_started());

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), &SupervisorState::Stopped);
        assert!(supervisor.pid().is_none());
    }

    #[tokio::test]
    async fn test_stopped_supervisor_cannot_restart() {
        let mut supervisor = ProcessSupervisor::new(
            "idle",
            command(),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        supervisor.stop().await.unwrap();

        let result = supervisor.start().await;
        assert!(matches!(
            result,
            Err(HarnessError::SupervisorFinished { .. })
        ));
    }
}
