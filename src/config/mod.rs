//! Configuration handling for agent-verify.
//!
//! This module provides configuration loading and validation,
//! supporting both `agent-verify.toml` files and sensible defaults.

use crate::checks::agent;
use crate::checks::precommit::DEFAULT_TOOL;
use crate::core::error::{Error, Result};
use crate::core::retry::{
    RetryConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONTEXT_CHARS, TRUNCATION_MARKER,
};
use crate::core::runner::RunnerConfig;
use crate::presets::{self, Preset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "agent-verify.toml";

/// Default artifact directory, relative to the worktree.
pub const DEFAULT_ARTIFACT_DIR: &str = ".agent-verify/artifacts";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipeline commands and limits.
    pub pipeline: PipelineConfig,
    /// AI retry policy.
    pub retry: RetrySettings,
    /// Artifact persistence.
    pub artifacts: ArtifactsConfig,
    /// Failure notification.
    pub notify: NotifyConfig,
}

impl Config {
    /// Loads configuration from the default location.
    pub fn load() -> Result<Self> {
        let path = Self::find_config_file()?;
        Self::load_from(&path)
    }

    /// Loads configuration or returns defaults if not found.
    pub fn load_or_default() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| Error::io("get current dir", e))?;
        Self::load_or_default_from(&cwd)
    }

    /// Loads the configuration governing `dir`, or defaults if there is none.
    pub fn load_or_default_from(dir: &Path) -> Result<Self> {
        match Self::find_config_file_from(dir) {
            Ok(path) => Self::load_from(&path),
            Err(Error::ConfigNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io("read config", e))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config_parse_with_source("Failed to parse TOML", e))?;

        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");

        Ok(config)
    }

    /// Finds the configuration file by searching up from the current directory.
    pub fn find_config_file() -> Result<PathBuf> {
        let cwd = std::env::current_dir().map_err(|e| Error::io("get current dir", e))?;
        Self::find_config_file_from(&cwd)
    }

    /// Finds the configuration file by searching up from `start`.
    pub fn find_config_file_from(start: &Path) -> Result<PathBuf> {
        let mut current = Some(start);
        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.is_file() {
                return Ok(config_path);
            }
            current = dir.parent();
        }

        Err(Error::ConfigNotFound {
            path: start.join(CONFIG_FILE_NAME),
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if humantime::parse_duration(&self.pipeline.timeout).is_err() {
            return Err(Error::ConfigInvalid {
                field: "pipeline.timeout".to_string(),
                message: format!("Invalid duration: {}", self.pipeline.timeout),
            });
        }

        if self.pipeline.pre_commit_tool.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                field: "pipeline.pre_commit_tool".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::ConfigInvalid {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let marker_len = TRUNCATION_MARKER.chars().count();
        if self.retry.max_context_chars < marker_len {
            return Err(Error::ConfigInvalid {
                field: "retry.max_context_chars".to_string(),
                message: format!("must be at least {marker_len}"),
            });
        }

        if !agent::is_supported(&self.retry.agent) {
            return Err(Error::ConfigInvalid {
                field: "retry.agent".to_string(),
                message: format!(
                    "Unknown agent '{}' (expected one of: {})",
                    self.retry.agent,
                    agent::SUPPORTED_AGENTS.join(", ")
                ),
            });
        }

        Ok(())
    }

    /// Generates default configuration as a string.
    #[must_use]
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Generates configuration for a specific preset.
    ///
    /// Unknown preset names yield the defaults.
    #[must_use]
    pub fn for_preset(preset: &str) -> Self {
        let mut config = Self::default();
        if let Some(preset) = presets::get(preset) {
            config.pipeline.apply_preset(preset);
        }
        config
    }

    /// Converts the pipeline section into the runner's configuration.
    pub fn runner_config(&self) -> Result<RunnerConfig> {
        let timeout = humantime::parse_duration(&self.pipeline.timeout).map_err(|e| {
            Error::ConfigInvalid {
                field: "pipeline.timeout".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(RunnerConfig {
            format_commands: self.pipeline.format.clone(),
            lint_commands: self.pipeline.lint.clone(),
            test_commands: self.pipeline.test.clone(),
            pre_commit_commands: self.pipeline.pre_commit.clone(),
            timeout,
            live_output: self.pipeline.live_output,
            pre_commit_tool: self.pipeline.pre_commit_tool.clone(),
        })
    }

    /// Converts the retry section into the orchestrator's policy.
    #[must_use]
    pub const fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            enabled: self.retry.enabled,
            max_attempts: self.retry.max_attempts,
            max_context_chars: self.retry.max_context_chars,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Format commands, run first and sequentially.
    pub format: Vec<String>,
    /// Lint commands, run alongside the tests.
    pub lint: Vec<String>,
    /// Test commands, run alongside the linters.
    pub test: Vec<String>,
    /// Pre-commit commands, run last.
    pub pre_commit: Vec<String>,
    /// Per-command timeout.
    pub timeout: String,
    /// Stream command output while it runs.
    pub live_output: bool,
    /// Tool that must be installed for the pre-commit phase to run.
    pub pre_commit_tool: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: Vec::new(),
            lint: Vec::new(),
            test: Vec::new(),
            pre_commit: Vec::new(),
            timeout: "5m".to_string(),
            live_output: false,
            pre_commit_tool: DEFAULT_TOOL.to_string(),
        }
    }
}

impl PipelineConfig {
    fn apply_preset(&mut self, preset: &Preset) {
        let owned = |cmds: &[&str]| cmds.iter().map(|c| (*c).to_string()).collect();
        self.format = owned(preset.format);
        self.lint = owned(preset.lint);
        self.test = owned(preset.test);
        self.pre_commit = owned(preset.pre_commit);
    }

    /// Returns true if no phase has any command.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.format.is_empty()
            && self.lint.is_empty()
            && self.test.is_empty()
            && self.pre_commit.is_empty()
    }
}

/// AI retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Whether AI retry is allowed.
    pub enabled: bool,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Cap on diagnostic context handed to the agent.
    pub max_context_chars: usize,
    /// Agent CLI to invoke.
    pub agent: String,
    /// Model override passed to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            agent: agent::CLAUDE.to_string(),
            model: None,
        }
    }
}

/// Artifact settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Whether results are persisted.
    pub enabled: bool,
    /// Directory, relative to the worktree unless absolute.
    pub dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: DEFAULT_ARTIFACT_DIR.to_string(),
        }
    }
}

impl ArtifactsConfig {
    /// Resolves the artifact directory against a worktree.
    #[must_use]
    pub fn resolve(&self, work_dir: &Path) -> PathBuf {
        let dir = Path::new(&self.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            work_dir.join(dir)
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Ring the terminal bell when validation fails.
    pub bell: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { bell: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.pipeline.is_empty());
        assert_eq!(config.pipeline.timeout, "5m");
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_context_chars, 4000);
        assert_eq!(config.retry.agent, "claude");
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_timeout() {
        let mut config = Config::default();
        config.pipeline.timeout = "invalid".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigInvalid { ref field, .. }) if field == "pipeline.timeout"
        ));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_cap_below_marker_rejected() {
        let mut config = Config::default();
        config.retry.max_context_chars = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let mut config = Config::default();
        config.retry.agent = "clippy".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_rust() {
        let config = Config::for_preset("rust");
        assert_eq!(config.pipeline.format, vec!["cargo fmt --all"]);
        assert!(config.pipeline.lint.iter().any(|c| c.contains("clippy")));
        assert_eq!(config.pipeline.pre_commit, vec!["pre-commit run --all-files"]);
    }

    #[test]
    fn test_preset_unknown_is_default() {
        assert_eq!(Config::for_preset("cobol"), Config::default());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml = Config::default_toml();
        assert!(toml.contains("[pipeline]"));
        assert!(toml.contains("[retry]"));
        assert!(toml.contains("[artifacts]"));
    }

    #[test]
    fn test_toml_roundtrip_of_preset() {
        let config = Config::for_preset("go");
        let text = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[pipeline]
lint = ["ruff check ."]
timeout = "90s"

[retry]
model = "sonnet"
"#,
        )
        .expect("write config");

        let config = Config::load_from(&path).expect("load");
        assert_eq!(config.pipeline.lint, vec!["ruff check ."]);
        assert!(config.pipeline.format.is_empty());
        assert_eq!(config.retry.model.as_deref(), Some("sonnet"));
        assert_eq!(config.retry.max_attempts, 3);

        let runner = config.runner_config().expect("runner config");
        assert_eq!(runner.timeout, Duration::from_secs(90));
        assert_eq!(runner.lint_commands, vec!["ruff check ."]);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[pipeline\nlint = ").expect("write config");

        assert!(matches!(
            Config::load_from(&path),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_find_config_walks_up() {
        let temp = TempDir::new().expect("create temp dir");
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "").expect("write config");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create nested");

        let found = Config::find_config_file_from(&nested).expect("find config");
        assert_eq!(found, temp.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let temp = TempDir::new().expect("create temp dir");
        let config = Config::load_or_default_from(temp.path()).expect("defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_retry_config_conversion() {
        let mut config = Config::default();
        config.retry.enabled = false;
        config.retry.max_attempts = 5;

        let retry = config.retry_config();
        assert!(!retry.enabled);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.max_context_chars, 4000);
    }

    #[test]
    fn test_artifact_dir_resolution() {
        let artifacts = ArtifactsConfig::default();
        assert_eq!(
            artifacts.resolve(Path::new("/work")),
            PathBuf::from("/work/.agent-verify/artifacts")
        );

        let absolute = ArtifactsConfig {
            dir: "/var/avf".to_string(),
            ..Default::default()
        };
        assert_eq!(absolute.resolve(Path::new("/work")), PathBuf::from("/var/avf"));
    }
}
