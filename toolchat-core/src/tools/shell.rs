//! Shell command executor.
//!
//! Runs `sh -c <command>` with stdout and stderr captured separately. The
//! shell leads its own process group; a timeout or an abandoned future
//! (operator interrupt) kills the whole group, so subshells and pipelines
//! forked by the command die with it.

use super::{ParamType, ToolExecutor, ToolInvocation, ToolOutput, ToolSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

pub const SHELL_TOOL: &str = "execute_shell_command";

/// Prefix of every timeout result
pub const TIMEOUT_MARKER: &str = "[timeout]";

const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Executes one shell command per invocation, exactly once, no retries.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    spec: ToolSpec,
    shell: String,
    working_dir: Option<PathBuf>,
    max_output_bytes: usize,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(SHELL_TOOL, "Execute a shell command. Use with caution.")
                .required("command", ParamType::String, "The shell command to execute."),
            shell: "sh".to_string(),
            working_dir: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Run a command under `timeout`.
    ///
    /// - exit 0: stdout (stderr appended under a marker when non-empty)
    /// - non-zero exit: `succeeded: false` with the captured stderr
    /// - timeout: process killed, `succeeded: false` starting with [`TIMEOUT_MARKER`]
    pub async fn run(&self, command: &str, timeout: Duration) -> ToolOutput {
        let started = Instant::now();
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to spawn shell");
                return ToolOutput::failed(format!("Failed to start command: {}", e));
            }
        };
        let mut group = GroupKill(child.id());

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ToolOutput::failed(format!("Failed to collect command output: {}", e));
            }
            Err(_) => {
                group.kill();
                tracing::info!(
                    command,
                    timeout_ms = timeout.as_millis() as u64,
                    "shell command timed out"
                );
                return timed_out(timeout);
            }
        };
        group.disarm();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            command,
            status = ?output.status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shell command finished"
        );

        let result = if output.status.success() {
            if stderr.trim().is_empty() {
                ToolOutput::ok(stdout.into_owned())
            } else {
                ToolOutput::ok(format!("{}\n[stderr]\n{}", stdout, stderr))
            }
        } else {
            let status = match output.status.code() {
                Some(code) => format!("status {}", code),
                None => "a signal".to_string(),
            };
            ToolOutput::failed(format!(
                "Command exited with {}. Stderr: {}",
                status, stderr
            ))
        };
        result.truncated(self.max_output_bytes)
    }
}

/// The failed output reported for a call that ran past `timeout`
pub fn timed_out(timeout: Duration) -> ToolOutput {
    ToolOutput::failed(format!(
        "{} Command did not finish within {:.1}s and was terminated",
        TIMEOUT_MARKER,
        timeout.as_secs_f64()
    ))
}

/// SIGKILLs a child's process group on drop unless disarmed.
struct GroupKill(Option<u32>);

impl GroupKill {
    fn disarm(&mut self) {
        self.0 = None;
    }

    fn kill(&mut self) {
        let Some(pgid) = self.0.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: killpg only sends a signal; the group was created at spawn
            let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(
                    pgid,
                    error = %std::io::Error::last_os_error(),
                    "process group already gone"
                );
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill();
    }
}

#[async_trait]
impl ToolExecutor for ShellExecutor {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, invocation: &ToolInvocation, timeout: Duration) -> ToolOutput {
        match invocation.str_arg("command") {
            Some(command) => self.run(command, timeout).await,
            None => ToolOutput::failed("missing required argument 'command'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let out = ShellExecutor::new()
            .run("echo hello", Duration::from_secs(5))
            .await;
        assert!(out.succeeded);
        assert_eq!(out.output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let out = ShellExecutor::new()
            .run("echo boom >&2; exit 3", Duration::from_secs(5))
            .await;
        assert!(!out.succeeded);
        assert!(out.output.contains("status 3"));
        assert!(out.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let started = Instant::now();
        let out = ShellExecutor::new()
            .run("sleep 10", Duration::from_millis(200))
            .await;
        assert!(!out.succeeded);
        assert!(out.output.starts_with(TIMEOUT_MARKER));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_subshells() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("late");
        let command = format!("(sleep 1; touch {}) ; echo done", marker.display());
        let out = ShellExecutor::new()
            .run(&command, Duration::from_millis(200))
            .await;
        assert!(out.output.starts_with(TIMEOUT_MARKER));

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_abandoned_run_kills_background_jobs() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("late");
        let command = format!("(sleep 1; touch {}) & wait", marker.display());
        let shell = ShellExecutor::new();
        let run = shell.run(&command, Duration::from_secs(30));
        assert!(tokio::time::timeout(Duration::from_millis(200), run).await.is_err());

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_working_dir_and_output_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = ShellExecutor::new()
            .with_working_dir(dir.path())
            .with_max_output_bytes(8)
            .run("pwd; echo more output here", Duration::from_secs(5))
            .await;
        assert!(out.succeeded);
        assert!(out.output.ends_with(super::super::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_execute_via_trait() {
        let exec = ShellExecutor::new();
        let inv = ToolInvocation::parse("c1", SHELL_TOOL, r#"{"command":"printf abc"}"#).unwrap();
        let out = exec.execute(&inv, Duration::from_secs(5)).await;
        assert_eq!(out, ToolOutput::ok("abc"));
    }
}
