//! Pipeline runner.
//!
//! Drives the validation phases in a fixed order:
//!
//! 1. format, sequentially; any failure stops the pipeline
//! 2. lint and test, concurrently; both branches always run to completion
//! 3. pre-commit, only when the hook tool is installed, followed by staging
//!    of any files the hooks rewrote
//!
//! Cancellation is checked at every phase boundary. Mid-command
//! cancellation is surfaced by the [`Executor`].

use crate::checks::precommit::{PathToolChecker, ToolChecker, DEFAULT_TOOL};
use crate::core::error::{Error, Result};
use crate::core::executor::{
    CommandRunner, Executor, ShellRunner, TerminalSink, DEFAULT_COMMAND_TIMEOUT,
};
use crate::core::git::{GitStager, Stager};
use crate::core::result::{CommandResult, Phase, PipelineResult};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Number of phases reported through [`ProgressInfo`].
pub const TOTAL_STEPS: usize = Phase::ALL.len();

/// Commands and limits for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Format commands.
    pub format_commands: Vec<String>,
    /// Lint commands.
    pub lint_commands: Vec<String>,
    /// Test commands.
    pub test_commands: Vec<String>,
    /// Pre-commit commands.
    pub pre_commit_commands: Vec<String>,
    /// Per-command deadline.
    pub timeout: Duration,
    /// Stream command output to the terminal while it runs.
    pub live_output: bool,
    /// Binary that must be installed for the pre-commit phase to run.
    pub pre_commit_tool: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            format_commands: Vec::new(),
            lint_commands: Vec::new(),
            test_commands: Vec::new(),
            pre_commit_commands: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            live_output: false,
            pre_commit_tool: DEFAULT_TOOL.to_string(),
        }
    }
}

impl RunnerConfig {
    /// Returns the configured commands for a phase.
    #[must_use]
    pub fn commands_for(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::Format => &self.format_commands,
            Phase::Lint => &self.lint_commands,
            Phase::Test => &self.test_commands,
            Phase::PreCommit => &self.pre_commit_commands,
        }
    }
}

/// Lifecycle status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    /// The phase is about to run.
    Starting,
    /// Every command passed.
    Completed,
    /// A command failed, timed out or was cancelled.
    Failed,
    /// The phase did not run.
    Skipped,
}

/// Sequencing metadata carried by every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInfo {
    /// 1-based step index.
    pub current_step: usize,
    /// Total number of steps.
    pub total_steps: usize,
    /// Time since the pipeline started.
    pub elapsed: Duration,
}

/// A phase boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Phase the event belongs to.
    pub phase: Phase,
    /// What happened.
    pub status: PhaseStatus,
    /// Sequencing metadata.
    pub info: ProgressInfo,
    /// Skip reason, when skipped.
    pub message: Option<String>,
}

/// Receives progress events.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Runs the validation pipeline.
#[derive(Clone)]
pub struct PipelineRunner {
    config: RunnerConfig,
    executor: Executor,
    tool_checker: Arc<dyn ToolChecker>,
    stager: Arc<dyn Stager>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner that executes commands through the shell.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_command_runner(config, Arc::new(ShellRunner::new()))
    }

    /// Creates a runner over a custom command runner.
    #[must_use]
    pub fn with_command_runner(config: RunnerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let mut executor = Executor::with_runner(runner).timeout(config.timeout);
        if config.live_output {
            executor = executor.live_output(Arc::new(TerminalSink));
        }

        Self {
            config,
            executor,
            tool_checker: Arc::new(PathToolChecker),
            stager: Arc::new(GitStager::default()),
            progress: None,
        }
    }

    /// Overrides the pre-commit tool checker.
    #[must_use]
    pub fn with_tool_checker(mut self, checker: Arc<dyn ToolChecker>) -> Self {
        self.tool_checker = checker;
        self
    }

    /// Overrides the stager used after pre-commit.
    #[must_use]
    pub fn with_stager(mut self, stager: Arc<dyn Stager>) -> Self {
        self.stager = stager;
        self
    }

    /// Registers a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs the full pipeline in `work_dir`.
    ///
    /// The returned [`PipelineResult`] holds every result collected before
    /// the pipeline stopped; the `Result` carries the error that stopped it.
    pub async fn run(
        &self,
        token: &CancellationToken,
        work_dir: &Path,
    ) -> (PipelineResult, Result<()>) {
        let start = Instant::now();
        let mut result = PipelineResult::default();

        let outcome = self.run_phases(token, work_dir, &mut result, start).await;

        result.duration = start.elapsed();
        result.success = outcome.is_ok();

        match &outcome {
            Ok(()) => tracing::info!(
                duration_ms = millis(result.duration),
                skipped = ?result.skipped_steps,
                "Validation passed"
            ),
            Err(e) => tracing::warn!(
                failed_step = ?result.failed_step_name.map(|p| p.name()),
                error = %e,
                duration_ms = millis(result.duration),
                "Validation failed"
            ),
        }

        (result, outcome)
    }

    async fn run_phases(
        &self,
        token: &CancellationToken,
        work_dir: &Path,
        result: &mut PipelineResult,
        start: Instant,
    ) -> Result<()> {
        // Format
        check_cancelled(token)?;
        self.emit(Phase::Format, PhaseStatus::Starting, start, None);
        let (results, outcome) = self
            .executor
            .run(token, Phase::Format, &self.config.format_commands, work_dir)
            .await;
        result.format_results = results;
        self.finish_phase(Phase::Format, outcome, result, start)?;

        // Lint and test
        check_cancelled(token)?;
        self.emit(Phase::Lint, PhaseStatus::Starting, start, None);
        self.emit(Phase::Test, PhaseStatus::Starting, start, None);

        let lint = self.spawn_phase(token, Phase::Lint, work_dir);
        let test = self.spawn_phase(token, Phase::Test, work_dir);
        let (lint, test) = tokio::join!(lint, test);

        let (lint_results, lint_outcome) = joined(Phase::Lint, lint);
        let (test_results, test_outcome) = joined(Phase::Test, test);
        result.lint_results = lint_results;
        result.test_results = test_results;

        let lint_outcome = self.finish_phase(Phase::Lint, lint_outcome, result, start);
        let test_outcome = self.finish_phase(Phase::Test, test_outcome, result, start);
        lint_outcome?;
        test_outcome?;

        // Pre-commit
        check_cancelled(token)?;
        self.run_pre_commit(token, work_dir, result, start).await
    }

    async fn run_pre_commit(
        &self,
        token: &CancellationToken,
        work_dir: &Path,
        result: &mut PipelineResult,
        start: Instant,
    ) -> Result<()> {
        let tool = &self.config.pre_commit_tool;

        if self.config.pre_commit_commands.is_empty() {
            self.skip_pre_commit(result, "no pre-commit commands configured".to_string(), start);
            return Ok(());
        }

        match self.tool_checker.is_installed(tool).await {
            Ok(status) if status.installed => {
                tracing::debug!(tool = %tool, version = ?status.version, "Pre-commit tool available");
            },
            Ok(_) => {
                self.skip_pre_commit(result, format!("{tool} not installed"), start);
                return Ok(());
            },
            Err(e) => {
                self.skip_pre_commit(result, format!("{tool} check failed: {e}"), start);
                return Ok(());
            },
        }

        self.emit(Phase::PreCommit, PhaseStatus::Starting, start, None);
        let (results, outcome) = self
            .executor
            .run(token, Phase::PreCommit, &self.config.pre_commit_commands, work_dir)
            .await;
        result.pre_commit_results = results;
        self.finish_phase(Phase::PreCommit, outcome, result, start)?;

        // Hooks may have rewritten files; restage them. Never fatal.
        match self.stager.stage_modified_files(work_dir).await {
            Ok(report) => {
                tracing::debug!(staged = report.staged.len(), "Restaged hook-modified files");
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to stage hook-modified files");
            },
        }

        Ok(())
    }

    fn skip_pre_commit(&self, result: &mut PipelineResult, reason: String, start: Instant) {
        tracing::info!(reason = %reason, "Skipping pre-commit phase");
        result.skipped_steps.push(Phase::PreCommit);
        result.skip_reasons.insert(Phase::PreCommit, reason.clone());
        self.emit(Phase::PreCommit, PhaseStatus::Skipped, start, Some(reason));
    }

    fn spawn_phase(
        &self,
        token: &CancellationToken,
        phase: Phase,
        work_dir: &Path,
    ) -> JoinHandle<(Vec<CommandResult>, Result<()>)> {
        let executor = self.executor.clone();
        let token = token.clone();
        let commands = self.config.commands_for(phase).to_vec();
        let work_dir = work_dir.to_path_buf();

        tokio::spawn(async move { executor.run(&token, phase, &commands, &work_dir).await })
    }

    /// Records the outcome of a phase and reports it.
    fn finish_phase(
        &self,
        phase: Phase,
        outcome: Result<()>,
        result: &mut PipelineResult,
        start: Instant,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.emit(phase, PhaseStatus::Completed, start, None);
                Ok(())
            },
            Err(e) => {
                if !e.is_cancelled() && result.failed_step_name.is_none() {
                    result.failed_step_name = Some(phase);
                }
                self.emit(phase, PhaseStatus::Failed, start, None);
                Err(e)
            },
        }
    }

    fn emit(&self, phase: Phase, status: PhaseStatus, start: Instant, message: Option<String>) {
        tracing::debug!(phase = phase.name(), status = ?status, "Phase transition");

        if let Some(ref callback) = self.progress {
            callback(&ProgressEvent {
                phase,
                status,
                info: ProgressInfo {
                    current_step: phase.step_number(),
                    total_steps: TOTAL_STEPS,
                    elapsed: start.elapsed(),
                },
                message,
            });
        }
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn joined(
    phase: Phase,
    joined: std::result::Result<(Vec<CommandResult>, Result<()>), tokio::task::JoinError>,
) -> (Vec<CommandResult>, Result<()>) {
    joined.unwrap_or_else(|e| {
        (
            Vec::new(),
            Err(Error::Internal {
                message: format!("{phase} task failed: {e}"),
            }),
        )
    })
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
