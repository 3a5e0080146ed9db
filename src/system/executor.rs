//! Subprocess executor.
//! Spawns a command, streams stdout/stderr line by line, and enforces a timeout,
//! an optional output line limit and an external terminate request.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::config::types::REDACTED;
use crate::error::{Result, TransportError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of one finished (or stopped) process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub command: String,
    /// `None` when the process was killed by a signal.
    pub return_code: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub terminated: bool,
    pub truncated: bool,
}

impl CommandOutput {
    /// Stdout with every line newline-terminated, the way the process wrote it.
    pub fn stdout(&self) -> String {
        join_lines(&self.stdout_lines)
    }

    pub fn stderr(&self) -> String {
        join_lines(&self.stderr_lines)
    }

    pub fn success(&self) -> bool {
        self.return_code == Some(0) && !self.terminated && !self.truncated
    }

    /// Turn a non-zero exit into a `TransportError::Exit`.
    pub fn check(self) -> Result<Self> {
        if self.return_code == Some(0) {
            Ok(self)
        } else {
            Err(TransportError::Exit {
                command: self.command.clone(),
                code: self.return_code,
                stderr: self.stderr().trim().to_string(),
            }
            .into())
        }
    }
}

fn join_lines(lines: &[String]) -> String {
    lines.iter().fold(String::new(), |mut acc, line| {
        acc.push_str(line);
        acc.push('\n');
        acc
    })
}

/// Asks a running [`Cli`] invocation to stop.
#[derive(Debug, Clone, Default)]
pub struct TerminateHandle(Arc<Notify>);

impl TerminateHandle {
    pub fn terminate(&self) {
        self.0.notify_waiters();
    }
}

#[derive(Debug, Clone)]
pub struct Cli {
    timeout: Duration,
    max_output_lines: usize,
    terminate: TerminateHandle,
    secrets: Vec<String>,
}

impl Default for Cli {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Cli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_output_lines: 0,
            terminate: TerminateHandle::default(),
            secrets: Vec::new(),
        }
    }

    /// Stop the process once `lines` lines were captured (0 = unlimited).
    pub fn with_max_output_lines(mut self, lines: usize) -> Self {
        self.max_output_lines = lines;
        self
    }

    /// Mask `secret` wherever the command line is logged or reported.
    pub fn with_secret(mut self, secret: &str) -> Self {
        if !secret.is_empty() {
            self.secrets.push(secret.to_string());
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        self.terminate.clone()
    }

    /// Printable form of an argv with secrets masked.
    pub fn display(&self, argv: &[String]) -> String {
        let joined = shell_words::join(argv);
        self.secrets
            .iter()
            .fold(joined, |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    /// Run `argv` directly, without a shell.
    pub async fn execute(&self, argv: &[String]) -> Result<CommandOutput> {
        let shown = self.display(argv);
        let (program, args) = argv.split_first().ok_or_else(|| TransportError::Spawn {
            command: shown.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.run(cmd, shown).await
    }

    /// Run `command` through `sh -c`.
    pub async fn shell(&self, command: &str) -> Result<CommandOutput> {
        let shown = self
            .secrets
            .iter()
            .fold(command.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        self.run(cmd, shown).await
    }

    async fn run(&self, mut cmd: Command, shown: String) -> Result<CommandOutput> {
        debug!("Executing: {}", shown);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: shown.clone(),
            source,
        })?;

        let mut output = CommandOutput {
            command: shown.clone(),
            ..Default::default()
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(TransportError::Spawn {
                command: shown,
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdio not captured"),
            }
            .into());
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let terminate = self.terminate.0.notified();
        tokio::pin!(terminate);

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        trace!("stdout: {}", line);
                        output.stdout_lines.push(line);
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!("Failed to read stdout of {}: {}", shown, e);
                        stdout_open = false;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        trace!("stderr: {}", line);
                        output.stderr_lines.push(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!("Failed to read stderr of {}: {}", shown, e);
                        stderr_open = false;
                    }
                },
                _ = &mut terminate => {
                    debug!("Terminating: {}", shown);
                    output.terminated = true;
                    break;
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(TransportError::Timeout { command: shown, after: self.timeout }.into());
                }
            }

            let captured = output.stdout_lines.len() + output.stderr_lines.len();
            if self.max_output_lines > 0 && captured >= self.max_output_lines {
                debug!("Truncating {} after {} lines", shown, self.max_output_lines);
                output.truncated = true;
                break;
            }
        }

        if output.terminated || output.truncated {
            if let Err(e) = child.start_kill() {
                warn!("Failed to stop {}: {}", shown, e);
            }
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|source| TransportError::Spawn {
                command: shown.clone(),
                source,
            })?,
            _ = &mut deadline => {
                let _ = child.kill().await;
                return Err(TransportError::Timeout { command: shown, after: self.timeout }.into());
            }
        };

        output.return_code = status.code();
        trace!("{} exited with {:?}", shown, output.return_code);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HushError;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let out = Cli::default()
            .shell("echo one; echo two; echo oops >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(out.stdout_lines, vec!["one", "two"]);
        assert_eq!(out.stderr(), "oops\n");
        assert_eq!(out.return_code, Some(3));
        assert!(!out.success());

        match out.check() {
            Err(HushError::Transport(TransportError::Exit { code, stderr, .. })) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn execute_runs_without_shell() {
        let out = Cli::default().execute(&argv(&["echo", "a b", "$HOME"])).await.unwrap();
        assert_eq!(out.stdout(), "a b $HOME\n");
        assert!(out.success());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = Cli::new(Duration::from_millis(200))
            .execute(&argv(&["sleep", "5"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HushError::Transport(TransportError::Timeout { .. })));
    }

    #[tokio::test]
    async fn output_is_truncated_at_line_limit() {
        let out = Cli::default()
            .with_max_output_lines(3)
            .shell("i=0; while [ $i -lt 1000 ]; do echo $i; i=$((i+1)); done; sleep 5")
            .await
            .unwrap();
        assert!(out.truncated);
        assert_eq!(out.stdout_lines, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn terminate_handle_stops_process() {
        let cli = Cli::default();
        let handle = cli.terminate_handle();
        let task = tokio::spawn(async move { cli.shell("sleep 5").await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.terminate();
        let out = task.await.unwrap().unwrap();
        assert!(out.terminated);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = Cli::default()
            .execute(&argv(&["/nonexistent/hush-test-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HushError::Transport(TransportError::Spawn { .. })));
    }

    #[test]
    fn secrets_are_masked_in_display() {
        let cli = Cli::default().with_secret("calvin");
        let shown = cli.display(&argv(&["ipmitool", "-P", "calvin", "sdr"]));
        assert_eq!(shown, format!("ipmitool -P {} sdr", REDACTED));
    }

    #[tokio::test]
    async fn reported_command_is_masked() {
        let out = Cli::default().with_secret("calvin").shell("echo calvin").await.unwrap();
        assert_eq!(out.command, format!("echo {}", REDACTED));
        assert_eq!(out.stdout(), "calvin\n");
    }
}
