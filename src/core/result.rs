//! Validation result model.
//!
//! Plain value records produced by the executor and the pipeline runner.
//! They serialize to the JSON layout persisted as validation artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One stage of the validation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Code formatters.
    Format,
    /// Linters and static analysis.
    Lint,
    /// Test suites.
    Test,
    /// Pre-commit hooks.
    PreCommit,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 4] = [Self::Format, Self::Lint, Self::Test, Self::PreCommit];

    /// Returns the step name used in results and prompts.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::PreCommit => "pre-commit",
        }
    }

    /// Returns the capitalized label used in check summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Format => "Format",
            Self::Lint => "Lint",
            Self::Test => "Test",
            Self::PreCommit => "Pre-commit",
        }
    }

    /// 1-based position in the pipeline.
    #[must_use]
    pub const fn step_number(&self) -> usize {
        match self {
            Self::Format => 1,
            Self::Lint => 2,
            Self::Test => 3,
            Self::PreCommit => 4,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Command text as configured.
    pub command: String,
    /// Exit code 0 with no run error, timeout or cancellation.
    pub success: bool,
    /// Process exit code (-1 when the process never produced one).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Run error, timeout or cancellation description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub ended_at: DateTime<Utc>,
}

impl CommandResult {
    /// Returns the error output, falling back to stdout when stderr is empty.
    #[must_use]
    pub fn error_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Outcome of a full pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// True when every phase that ran passed.
    pub success: bool,
    /// Format phase results.
    pub format_results: Vec<CommandResult>,
    /// Lint phase results.
    pub lint_results: Vec<CommandResult>,
    /// Test phase results.
    pub test_results: Vec<CommandResult>,
    /// Pre-commit phase results.
    pub pre_commit_results: Vec<CommandResult>,
    /// Total duration.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Phase that failed, `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step_name: Option<Phase>,
    /// Phases that were skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_steps: Vec<Phase>,
    /// Why each skipped phase was skipped.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skip_reasons: BTreeMap<Phase, String>,
}

impl PipelineResult {
    /// Returns the results recorded for a phase.
    #[must_use]
    pub fn results_for(&self, phase: Phase) -> &[CommandResult] {
        match phase {
            Phase::Format => &self.format_results,
            Phase::Lint => &self.lint_results,
            Phase::Test => &self.test_results,
            Phase::PreCommit => &self.pre_commit_results,
        }
    }

    /// Flattens every phase in the fixed order format, lint, test, pre-commit.
    #[must_use]
    pub fn all_results(&self) -> Vec<&CommandResult> {
        Phase::ALL
            .iter()
            .flat_map(|phase| self.results_for(*phase))
            .collect()
    }

    /// Returns failed command results in pipeline order.
    pub fn failed_results(&self) -> impl Iterator<Item = &CommandResult> {
        Phase::ALL
            .into_iter()
            .flat_map(move |phase| self.results_for(phase))
            .filter(|r| !r.success)
    }

    /// Returns true if the phase was skipped.
    #[must_use]
    pub fn was_skipped(&self, phase: Phase) -> bool {
        self.skipped_steps.contains(&phase)
    }

    /// Derives the four named checks shown to users.
    ///
    /// A check passes when none of its results failed; an empty phase passes.
    #[must_use]
    pub fn build_checks(&self) -> Vec<Check> {
        Phase::ALL
            .iter()
            .map(|phase| Check {
                name: phase.label().to_string(),
                passed: self.results_for(*phase).iter().all(|r| r.success),
                skipped: *phase == Phase::PreCommit && self.was_skipped(*phase),
            })
            .collect()
    }
}

/// Named pass/fail summary for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Display name ("Format", "Lint", "Test", "Pre-commit").
    pub name: String,
    /// Whether every result in the phase passed.
    pub passed: bool,
    /// Whether the phase was skipped.
    pub skipped: bool,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
