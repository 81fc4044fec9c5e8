//! Handles to long-lived child processes.

use std::process::ExitStatus;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Child;

/// How a [`ManagedProcess::terminate`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateOutcome {
    /// The process had already exited before we signalled it.
    AlreadyExited,
    /// The process exited within the grace period after SIGTERM.
    Exited,
    /// The grace period elapsed and the process was force-killed.
    Killed,
}

/// A spawned child plus the metadata the supervisors report.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    pid: Option<u32>,
    label: String,
    launched_at: DateTime<Utc>,
}

impl ManagedProcess {
    pub fn new(child: Child, label: impl Into<String>) -> Self {
        Self {
            pid: child.id(),
            child,
            label: label.into(),
            launched_at: Utc::now(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    /// Non-blocking exit check.
    pub fn is_alive(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// Exit status if the process has exited, `None` while it runs.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(process = %self.label, pid = self.pid, "Liveness check failed: {e}");
                None
            }
        }
    }

    /// Wait out the startup grace period.
    ///
    /// Returns early with [`vr_core::Error::StartupFailed`] as soon as the
    /// process exits within the period.
    pub async fn wait_for_startup(&mut self, grace: Duration) -> vr_core::Result<()> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Err(_still_running) => Ok(()),
            Ok(Ok(status)) => Err(vr_core::Error::startup(
                &self.label,
                format!("exited during startup with {status}"),
            )),
            Ok(Err(e)) => Err(vr_core::Error::startup(
                &self.label,
                format!("failed to observe startup: {e}"),
            )),
        }
    }

    /// Ask the process to exit, escalating to a forced kill.
    ///
    /// Sends SIGTERM (on unix), waits up to `timeout`, then kills. Never
    /// fails: signalling and kill errors are logged.
    pub async fn terminate(&mut self, timeout: Duration) -> TerminateOutcome {
        if self.exit_status().is_some() {
            return TerminateOutcome::AlreadyExited;
        }

        self.send_term();

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(process = %self.label, pid = self.pid, %status, "Process exited");
                TerminateOutcome::Exited
            }
            Ok(Err(e)) => {
                tracing::warn!(process = %self.label, pid = self.pid, "Wait failed: {e}; killing");
                self.force_kill().await;
                TerminateOutcome::Killed
            }
            Err(_elapsed) => {
                tracing::warn!(
                    process = %self.label,
                    pid = self.pid,
                    "Process did not exit within {timeout:?}, forcing kill"
                );
                self.force_kill().await;
                TerminateOutcome::Killed
            }
        }
    }

    #[cfg(unix)]
    fn send_term(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            tracing::warn!(process = %self.label, pid, "SIGTERM failed: {e}");
        }
    }

    #[cfg(not(unix))]
    fn send_term(&self) {}

    async fn force_kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(process = %self.label, pid = self.pid, "Kill failed: {e}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::ToolCommand;
    use crate::test_support::script;
    use std::path::PathBuf;
    use std::time::Instant;

    fn spawn(program: PathBuf) -> ManagedProcess {
        ToolCommand::new(program)
            .spawn_supervised("test", true)
            .unwrap()
    }

    #[tokio::test]
    async fn terminate_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = spawn(script(dir.path(), "sleeper", "exec sleep 30"));
        assert!(proc.pid().is_some());
        assert!(proc.is_alive());

        let outcome = proc.terminate(Duration::from_secs(5)).await;
        assert_eq!(outcome, TerminateOutcome::Exited);
        assert!(!proc.is_alive());
    }

    #[tokio::test]
    async fn terminate_escalates_when_term_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = spawn(script(
            dir.path(),
            "stubborn",
            "trap '' TERM\nwhile :; do sleep 1; done",
        ));
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let outcome = proc.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, TerminateOutcome::Killed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!proc.is_alive());
    }

    #[tokio::test]
    async fn terminate_after_exit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = spawn(script(dir.path(), "quick", "exit 0"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            proc.terminate(Duration::from_secs(1)).await,
            TerminateOutcome::AlreadyExited
        );
    }

    #[tokio::test]
    async fn startup_grace_detects_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = spawn(script(dir.path(), "crash", "exit 3"));
        let err = proc
            .wait_for_startup(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, vr_core::Error::StartupFailed { .. }));

        let mut proc = spawn(script(dir.path(), "steady", "exec sleep 30"));
        proc.wait_for_startup(Duration::from_millis(100)).await.unwrap();
        assert!(proc.is_alive());
        proc.terminate(Duration::from_secs(2)).await;
    }
}
