//! Command execution for validation phases.
//!
//! This module runs shell commands with a per-command deadline, cooperative
//! cancellation, output capture and an optional live tee of both streams.

use crate::core::error::{Error, Result};
use crate::core::result::{CommandResult, Phase};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Error text recorded on a result whose command hit its deadline.
pub const TIMEOUT_ERROR: &str = "command timed out";

/// Raw output from a command runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code of the command.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Which stream a teed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Receives command output live, line by line.
pub trait OutputSink: Send + Sync {
    /// Called for every line as it is read.
    fn line(&self, stream: Stream, line: &str);
}

/// Sink that mirrors command output to the terminal's stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSink;

impl OutputSink for TerminalSink {
    fn line(&self, _stream: Stream, line: &str) {
        eprintln!("{}", console::style(line).dim());
    }
}

/// Runs one shell command in a directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command and returns its captured output.
    ///
    /// A non-zero exit is not an error; `Err` means the command could not run.
    async fn run(&self, work_dir: &Path, command: &str) -> Result<CommandOutput>;

    /// Runs the command, teeing both streams to `sink` while still capturing them.
    async fn run_streaming(
        &self,
        work_dir: &Path,
        command: &str,
        sink: Arc<dyn OutputSink>,
    ) -> Result<CommandOutput> {
        drop(sink);
        self.run(work_dir, command).await
    }
}

/// [`CommandRunner`] that spawns commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Creates a runner using `sh -c` (`cmd /C` on Windows).
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn spawn_and_wait(
        &self,
        work_dir: &Path,
        command: &str,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Result<CommandOutput> {
        let (shell, shell_arg) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg)
            .arg(command)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout or cancellation must not leak the child.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::io("spawn command", e))?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_lines(out, Stream::Stdout, sink.clone())));
        let stderr_handle = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_lines(err, Stream::Stderr, sink)));

        let status = child
            .wait()
            .await
            .map_err(|e| Error::io("wait for command", e))?;

        let stdout = join_reader(stdout_handle, "stdout").await?;
        let stderr = join_reader(stderr_handle, "stderr").await?;

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(1),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, work_dir: &Path, command: &str) -> Result<CommandOutput> {
        self.spawn_and_wait(work_dir, command, None).await
    }

    async fn run_streaming(
        &self,
        work_dir: &Path,
        command: &str,
        sink: Arc<dyn OutputSink>,
    ) -> Result<CommandOutput> {
        self.spawn_and_wait(work_dir, command, Some(sink)).await
    }
}

async fn read_lines<R>(reader: R, stream: Stream, sink: Option<Arc<dyn OutputSink>>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut output = String::new();
    // A non-UTF-8 line must not stop the drain.
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Ok(Some(bytes)) = segments.next_segment().await {
        let line = String::from_utf8_lossy(&bytes);
        if let Some(ref sink) = sink {
            sink.line(stream, &line);
        }
        output.push_str(&line);
        output.push('\n');
    }
    output
}

async fn join_reader(
    handle: Option<tokio::task::JoinHandle<String>>,
    name: &str,
) -> Result<String> {
    match handle {
        Some(handle) => handle.await.map_err(|e| Error::Internal {
            message: format!("{name} task failed: {e}"),
        }),
        None => Ok(String::new()),
    }
}

enum Completion {
    Finished(Result<CommandOutput>),
    TimedOut,
    Cancelled,
}

/// Executes validation commands with deadlines and cancellation.
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    sink: Option<Arc<dyn OutputSink>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("timeout", &self.timeout)
            .field("live_output", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Creates an executor backed by [`ShellRunner`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ShellRunner::new()))
    }

    /// Creates an executor backed by a custom runner.
    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            sink: None,
        }
    }

    /// Sets the per-command deadline.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Tees command output to `sink` while it runs.
    #[must_use]
    pub fn live_output(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Returns the per-command deadline.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `commands` in order, stopping at the first failure.
    ///
    /// Returns every result collected so far alongside the error that stopped
    /// the sequence. Cancellation is checked before each command, so a token
    /// cancelled up front yields no results at all.
    pub async fn run(
        &self,
        token: &CancellationToken,
        phase: Phase,
        commands: &[String],
        work_dir: &Path,
    ) -> (Vec<CommandResult>, Result<()>) {
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            if token.is_cancelled() {
                return (results, Err(Error::Cancelled));
            }

            let (result, outcome) = self.run_single(token, phase, command, work_dir).await;
            results.push(result);

            if outcome.is_err() {
                return (results, outcome);
            }
        }

        (results, Ok(()))
    }

    /// Runs one command under the configured deadline.
    ///
    /// The returned [`CommandResult`] is always populated; the `Result`
    /// classifies the outcome as timeout, cancellation, failure or success.
    pub async fn run_single(
        &self,
        token: &CancellationToken,
        phase: Phase,
        command: &str,
        work_dir: &Path,
    ) -> (CommandResult, Result<()>) {
        let started_at = Utc::now();
        let start = Instant::now();

        let execution = match self.sink {
            Some(ref sink) => self
                .runner
                .run_streaming(work_dir, command, Arc::clone(sink)),
            None => self.runner.run(work_dir, command),
        };

        let completion = tokio::select! {
            biased;
            finished = tokio::time::timeout(self.timeout, execution) => match finished {
                Ok(output) => Completion::Finished(output),
                Err(_) => Completion::TimedOut,
            },
            () = token.cancelled() => Completion::Cancelled,
        };

        let duration = start.elapsed();
        let mut result = CommandResult {
            command: command.to_string(),
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            error: None,
            started_at,
            ended_at: Utc::now(),
        };
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        let outcome = match completion {
            Completion::TimedOut => {
                result.error = Some(TIMEOUT_ERROR.to_string());
                tracing::error!(
                    step = phase.name(),
                    command,
                    duration_ms,
                    timeout = %humantime::format_duration(self.timeout),
                    "Command timed out"
                );
                Err(Error::CommandTimeout {
                    command: command.to_string(),
                    timeout: humantime::format_duration(self.timeout).to_string(),
                })
            },
            Completion::Cancelled => {
                result.error = Some("command cancelled".to_string());
                tracing::warn!(step = phase.name(), command, duration_ms, "Command cancelled");
                Err(Error::Cancelled)
            },
            Completion::Finished(Err(e)) => {
                let message = e.to_string();
                result.error = Some(message.clone());
                tracing::error!(
                    step = phase.name(),
                    command,
                    duration_ms,
                    error = %message,
                    "Command could not run"
                );
                Err(Error::command_failed(phase.name(), command, message, None))
            },
            Completion::Finished(Ok(output)) => {
                result.exit_code = output.exit_code;
                result.stdout = output.stdout;
                result.stderr = output.stderr;
                result.success = output.exit_code == 0;

                if result.success {
                    tracing::info!(
                        step = phase.name(),
                        command,
                        exit_code = output.exit_code,
                        duration_ms,
                        "Command succeeded"
                    );
                    Ok(())
                } else {
                    tracing::error!(
                        step = phase.name(),
                        command,
                        exit_code = output.exit_code,
                        duration_ms,
                        "Command failed"
                    );
                    Err(Error::command_failed(
                        phase.name(),
                        command,
                        format!("exit code {}", output.exit_code),
                        Some(output.exit_code),
                    ))
                }
            },
        };

        (result, outcome)
    }
}
