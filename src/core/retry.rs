//! AI-assisted retry.
//!
//! One call to [`RetryOrchestrator::retry_with_ai`] is one remediation
//! attempt: distil the failed run into a bounded diagnostic context, hand it
//! to an external coding agent, then re-run the whole pipeline. Deciding
//! whether to try again is left to the caller.

use crate::core::error::{Error, Result};
use crate::core::result::{Phase, PipelineResult};
use crate::core::runner::PipelineRunner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default number of AI attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default cap on diagnostic context, in characters.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 4000;

/// Appended to diagnostic context that was cut short.
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

const BLOCK_SEPARATOR: &str = "\n---\n";

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Whether AI retry is allowed at all.
    pub enabled: bool,
    /// Highest attempt number accepted.
    pub max_attempts: u32,
    /// Cap on the diagnostic text handed to the agent.
    pub max_context_chars: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

/// What went wrong, condensed for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// Name of the failed step.
    pub failed_step: String,
    /// Failed commands in pipeline order.
    pub failed_commands: Vec<String>,
    /// Diagnostic text, never longer than the configured cap.
    pub error_output: String,
    /// Attempt this context is for.
    pub attempt: u32,
    /// Attempt budget.
    pub max_attempts: u32,
}

/// A request to an external coding agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRequest {
    /// Agent name, e.g. `claude`.
    pub agent: String,
    /// Optional model override.
    pub model: Option<String>,
    /// Instructions for the agent.
    pub prompt: String,
    /// Directory the agent works in.
    pub working_dir: PathBuf,
}

/// What the agent reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiResult {
    /// Whether the agent finished without error.
    pub success: bool,
    /// Files the agent touched.
    pub files_changed: Vec<String>,
}

/// Hands a prompt to an external coding agent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiRunner: Send + Sync {
    /// Runs the agent to completion.
    async fn run(&self, request: AiRequest) -> Result<AiResult>;
}

/// Snapshot of one remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryResult {
    /// Whether re-validation passed.
    pub success: bool,
    /// Attempt number.
    pub attempt: u32,
    /// Result of re-validation.
    pub pipeline_result: PipelineResult,
    /// What the agent reported.
    pub ai_result: AiResult,
}

/// Signal fired after the agent returns and before re-validation.
pub type AiCompleteCallback = Arc<dyn Fn(&AiResult) + Send + Sync>;

/// Runs bounded AI remediation attempts.
#[derive(Clone)]
pub struct RetryOrchestrator {
    config: RetryConfig,
    pipeline: PipelineRunner,
    ai: Arc<dyn AiRunner>,
    on_ai_complete: Option<AiCompleteCallback>,
}

impl std::fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl RetryOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(config: RetryConfig, pipeline: PipelineRunner, ai: Arc<dyn AiRunner>) -> Self {
        Self {
            config,
            pipeline,
            ai,
            on_ai_complete: None,
        }
    }

    /// Registers the AI-complete signal.
    #[must_use]
    pub fn on_ai_complete(mut self, callback: AiCompleteCallback) -> Self {
        self.on_ai_complete = Some(callback);
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Makes one AI remediation attempt for a failed pipeline run.
    ///
    /// Preconditions are checked in order: retry enabled, attempt within
    /// budget, not cancelled, worktree present. None of them invoke the
    /// agent when they fail.
    ///
    /// When re-validation still fails, the returned [`RetryResult`] holds
    /// the new pipeline result and the error is
    /// [`Error::ValidationFailed`].
    pub async fn retry_with_ai(
        &self,
        token: &CancellationToken,
        failed: &PipelineResult,
        work_dir: &Path,
        attempt: u32,
        agent: &str,
        model: Option<&str>,
    ) -> (Option<RetryResult>, Result<()>) {
        if let Err(e) = self.check_preconditions(token, work_dir, attempt) {
            return (None, Err(e));
        }

        let context = extract_error_context(
            failed,
            attempt,
            self.config.max_attempts,
            self.config.max_context_chars,
        );
        let request = AiRequest {
            agent: agent.to_string(),
            model: model.map(ToString::to_string),
            prompt: build_prompt(&context),
            working_dir: work_dir.to_path_buf(),
        };

        tracing::info!(
            attempt,
            max_attempts = self.config.max_attempts,
            agent,
            step = %context.failed_step,
            failed_commands = context.failed_commands.len(),
            "Invoking AI agent"
        );

        let invocation = tokio::select! {
            biased;
            () = token.cancelled() => return (None, Err(Error::Cancelled)),
            invocation = self.ai.run(request) => invocation,
        };

        let ai_result = match invocation {
            Ok(result) => result,
            Err(Error::Cancelled) => return (None, Err(Error::Cancelled)),
            Err(e) => {
                tracing::error!(agent, attempt, error = %e, "AI agent failed");
                return (None, Err(Error::ai_invocation(agent, e)));
            },
        };

        tracing::info!(
            attempt,
            files_changed = ai_result.files_changed.len(),
            "AI agent finished, re-validating"
        );

        if let Some(ref callback) = self.on_ai_complete {
            callback(&ai_result);
        }

        if token.is_cancelled() {
            return (None, Err(Error::Cancelled));
        }

        let (pipeline_result, outcome) = self.pipeline.run(token, work_dir).await;
        let success = pipeline_result.success;
        let failed_step = step_name(&pipeline_result);

        let retry = RetryResult {
            success,
            attempt,
            pipeline_result,
            ai_result,
        };

        let outcome = match outcome {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(_) => Err(Error::ValidationFailed {
                step: failed_step,
                attempt,
            }),
        };

        (Some(retry), outcome)
    }

    fn check_preconditions(
        &self,
        token: &CancellationToken,
        work_dir: &Path,
        attempt: u32,
    ) -> Result<()> {
        if !self.config.enabled {
            return Err(Error::RetryDisabled);
        }

        if attempt > self.config.max_attempts {
            return Err(Error::MaxRetriesExceeded {
                attempt,
                max: self.config.max_attempts,
            });
        }

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !work_dir.exists() {
            return Err(Error::WorktreeNotFound {
                path: work_dir.to_path_buf(),
            });
        }

        Ok(())
    }
}

fn step_name(result: &PipelineResult) -> String {
    result
        .failed_step_name
        .map_or("unknown", |p: Phase| p.name())
        .to_string()
}

/// Condenses a failed pipeline run into a [`RetryContext`].
///
/// Each failed command contributes one block with its command text, exit
/// code, optional run error and error output. The joined text is capped at
/// `max_chars` characters, ending in [`TRUNCATION_MARKER`] when cut.
#[must_use]
pub fn extract_error_context(
    result: &PipelineResult,
    attempt: u32,
    max_attempts: u32,
    max_chars: usize,
) -> RetryContext {
    let failed: Vec<_> = result.failed_results().collect();

    let blocks: Vec<String> = failed
        .iter()
        .map(|r| {
            let mut block = format!("Command: {}\nExit code: {}\n", r.command, r.exit_code);
            if let Some(ref error) = r.error {
                block.push_str(&format!("Error: {error}\n"));
            }
            block.push_str("Output:\n");
            block.push_str(r.error_output().trim_end());
            block
        })
        .collect();

    RetryContext {
        failed_step: step_name(result),
        failed_commands: failed.iter().map(|r| r.command.clone()).collect(),
        error_output: truncate(&blocks.join(BLOCK_SEPARATOR), max_chars),
        attempt,
        max_attempts,
    }
}

/// Caps `text` at `max_chars` characters, marker included.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars < marker_chars {
        return TRUNCATION_MARKER.chars().take(max_chars).collect();
    }

    let keep = max_chars - marker_chars;
    let cut = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(idx, _)| idx);

    format!("{}{TRUNCATION_MARKER}", &text[..cut])
}

/// Renders the agent prompt for a retry context.
#[must_use]
pub fn build_prompt(context: &RetryContext) -> String {
    let mut prompt = format!(
        "The {} step of the validation pipeline failed (attempt {} of {}).\n\n",
        context.failed_step, context.attempt, context.max_attempts
    );

    prompt.push_str("Failed commands:\n");
    for command in &context.failed_commands {
        prompt.push_str(&format!("- {command}\n"));
    }

    prompt.push_str(&format!(
        "\nError output:\n{}\n\n\
         Fix the code so these commands pass. Change only what the failures \
         require and do not disable or skip any check.\n",
        context.error_output
    ));

    prompt
}
