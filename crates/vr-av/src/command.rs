//! Builder for executing external tool commands.
//!
//! [`ToolCommand::execute`] runs a one-shot invocation with a timeout and
//! captures its output. [`ToolCommand::spawn_supervised`] and
//! [`ToolCommand::spawn_reader`] start long-lived children wrapped in a
//! [`ManagedProcess`]. Children tied to their handle have stderr drained
//! into `debug` events; detached children write stderr to `/dev/null` so they
//! never depend on this process staying around to read it.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};

use crate::process::ManagedProcess;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use vr_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> vr_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-version")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            envs: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the maximum execution time for [`ToolCommand::execute`].
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`vr_core::Error::Tool`] if spawning fails, if the process
    /// times out, or if it exits with a non-zero status (message includes
    /// stderr).
    pub async fn execute(&self) -> vr_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| vr_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // Dropping the wait future on timeout drops the child, and
        // `kill_on_drop` reaps it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(vr_core::Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(vr_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(vr_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Spawn a long-lived child with stdout discarded.
    ///
    /// With `kill_on_drop`, dropping the returned handle kills the child;
    /// without it the child outlives the handle and its stderr is discarded.
    pub fn spawn_supervised(
        &self,
        label: &str,
        kill_on_drop: bool,
    ) -> vr_core::Result<ManagedProcess> {
        let (process, _) = self.spawn_with(label, kill_on_drop, Stdio::null())?;
        Ok(process)
    }

    /// Spawn a long-lived child whose stdout is handed back to the caller.
    /// The child is always killed when the handle is dropped.
    pub fn spawn_reader(&self, label: &str) -> vr_core::Result<(ManagedProcess, ChildStdout)> {
        let (process, stdout) = self.spawn_with(label, true, Stdio::piped())?;
        let stdout = stdout.ok_or_else(|| {
            vr_core::Error::tool(self.program_name(), "stdout was not captured")
        })?;
        Ok((process, stdout))
    }

    fn spawn_with(
        &self,
        label: &str,
        kill_on_drop: bool,
        stdout: Stdio,
    ) -> vr_core::Result<(ManagedProcess, Option<ChildStdout>)> {
        // A detached child must not get SIGPIPE once nobody drains its stderr.
        let stderr = if kill_on_drop {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(kill_on_drop);

        let mut child = cmd.spawn().map_err(|e| {
            let program = self.program.display();
            vr_core::Error::startup(label, format!("failed to spawn {program}: {e}"))
        })?;

        let pid = child.id();
        tracing::info!(
            process = label,
            pid,
            program = %self.program.display(),
            args = ?self.args,
            "Spawned subprocess"
        );

        if let Some(stderr) = child.stderr.take() {
            drain_stderr(label.to_string(), pid, stderr);
        }
        let stdout = child.stdout.take();

        Ok((ManagedProcess::new(child, label), stdout))
    }
}

/// Forward each stderr line of a child to a `debug` event until EOF.
fn drain_stderr(label: String, pid: Option<u32>, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(process = %label, pid, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(process = %label, pid, "stderr closed: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert!(matches!(result, Err(vr_core::Error::Tool { .. })));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn spawn_missing_program_is_startup_failure() {
        let err = ToolCommand::new(PathBuf::from("/nonexistent/mediamtx"))
            .spawn_supervised("relay", false)
            .unwrap_err();
        assert!(matches!(err, vr_core::Error::StartupFailed { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn detached_child_stderr_is_not_a_pipe() {
        use crate::test_support::script;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("fds");
        let target = out.display();
        let body = format!(
            "readlink /proc/$$/fd/2 > {target}\n\
             readlink /proc/$$/fd/1 >> {target}\n\
             echo \"$MTX_TEST\" >> {target}"
        );
        let program = script(dir.path(), "child", &body);

        let mut cmd = ToolCommand::new(program);
        cmd.env("MTX_TEST", "on");
        let mut detached = cmd.spawn_supervised("detached", false).unwrap();
        for _ in 0..100 {
            if detached.exit_status().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let seen = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = seen.lines().collect();
        assert_eq!(lines, ["/dev/null", "/dev/null", "on"]);
    }

    #[test]
    fn builder_collects_args() {
        let mut cmd = ToolCommand::new(PathBuf::from("ffmpeg"));
        cmd.arg("-re").args(["-stream_loop", "-1"]);
        assert_eq!(cmd.get_args(), ["-re", "-stream_loop", "-1"]);
    }
}
