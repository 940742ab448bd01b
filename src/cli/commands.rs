//! CLI command implementations.

use crate::artifacts::{ArtifactSaver, FsArtifactSaver, DEFAULT_TASK_ID};
use crate::checks::agent::AgentCliRunner;
use crate::checks::precommit;
use crate::cli::progress::PhaseDisplay;
use crate::config::{Config, CONFIG_FILE_NAME};
use crate::core::error::{Error, Result};
use crate::core::report::format_result;
use crate::core::result::{Phase, PipelineResult};
use crate::core::retry::{AiResult, RetryOrchestrator};
use crate::core::runner::PipelineRunner;
use crate::notify::{BellNotifier, Notifier};
use crate::presets;
use console::style;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Initialize configuration.
pub fn init(preset: Option<&str>, force: bool) -> Result<ExitCode> {
    let cwd = current_dir()?;
    let config_path = cwd.join(CONFIG_FILE_NAME);

    // Check if config already exists
    if config_path.exists() && !force {
        eprintln!(
            "{} Configuration already exists: {}",
            style("!").yellow(),
            config_path.display()
        );
        eprintln!("  Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    let preset = match preset {
        Some(name) => presets::get(name),
        None => {
            let detected = presets::detect(&cwd);
            if let Some(p) = detected {
                eprintln!(
                    "{} Detected {} project - using the {} preset",
                    style("•").cyan(),
                    p.name,
                    p.name
                );
            }
            detected
        },
    };

    let mut config = preset.map_or_else(Config::default, |p| Config::for_preset(p.name));

    if !config.pipeline.pre_commit.is_empty() && !precommit::config_exists(&cwd) {
        config.pipeline.pre_commit.clear();
        eprintln!(
            "{} No {} found - leaving the pre-commit phase empty",
            style("•").cyan(),
            precommit::PRE_COMMIT_CONFIG
        );
    }

    // Write config
    let toml = toml::to_string_pretty(&config).map_err(|e| Error::Internal {
        message: format!("Failed to serialize config: {e}"),
    })?;

    std::fs::write(&config_path, toml).map_err(|e| Error::io("write config", e))?;

    eprintln!("{} Created {}", style("✓").green(), config_path.display());

    if let Some(p) = preset {
        eprintln!("  Using preset: {} ({})", p.name, p.description);
    }

    eprintln!("\nNext steps:");
    eprintln!("  1. Review and customize {CONFIG_FILE_NAME}");
    eprintln!("  2. Run: avf run");

    Ok(ExitCode::SUCCESS)
}

/// Run the validation pipeline once.
pub async fn run(
    token: &CancellationToken,
    dir: Option<&Path>,
    task: Option<&str>,
) -> Result<ExitCode> {
    let work_dir = resolve_work_dir(dir)?;
    let config = load_config(&work_dir)?;

    let display = PhaseDisplay::start(!config.pipeline.live_output);
    let runner = PipelineRunner::new(config.runner_config()?).with_progress(display.callback());

    let (result, outcome) = runner.run(token, &work_dir).await;
    display.finish();

    let artifact = save_artifact(&config, &work_dir, task, &result).await;
    report(&config, &result, artifact.as_deref());

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            tracing::debug!(error = %e, "Validation failed");
            Ok(ExitCode::FAILURE)
        },
    }
}

/// Run the pipeline, then hand failures to an AI agent until it passes.
pub async fn fix(
    token: &CancellationToken,
    dir: Option<&Path>,
    task: Option<&str>,
    agent: Option<&str>,
    model: Option<&str>,
) -> Result<ExitCode> {
    let work_dir = resolve_work_dir(dir)?;
    let config = load_config(&work_dir)?;

    let agent = agent.unwrap_or(&config.retry.agent).to_string();
    let model = model
        .map(ToString::to_string)
        .or_else(|| config.retry.model.clone());

    let display = PhaseDisplay::start(!config.pipeline.live_output);
    let pipeline = PipelineRunner::new(config.runner_config()?).with_progress(display.callback());

    let (mut result, outcome) = pipeline.run(token, &work_dir).await;
    let mut artifact = save_artifact(&config, &work_dir, task, &result).await;

    match outcome {
        Ok(()) => {
            display.finish();
            report(&config, &result, artifact.as_deref());
            return Ok(ExitCode::SUCCESS);
        },
        Err(Error::Cancelled) => {
            display.finish();
            return Err(Error::Cancelled);
        },
        Err(e) => tracing::debug!(error = %e, "Initial validation failed"),
    }

    let ai_display = display.clone();
    let orchestrator = RetryOrchestrator::new(
        config.retry_config(),
        pipeline,
        Arc::new(AgentCliRunner::default()),
    )
    .on_ai_complete(Arc::new(move |ai: &AiResult| {
        ai_display.line(format!(
            "{} Agent changed {} file(s), re-validating",
            style("•").cyan(),
            ai.files_changed.len()
        ));
    }));
    let max_attempts = orchestrator.config().max_attempts;

    for attempt in 1..=max_attempts {
        display.line(format!(
            "{} Attempt {attempt}/{max_attempts}: asking {agent} to fix the {} step",
            style("•").cyan(),
            result.failed_step_name.map_or("unknown", |p| p.name())
        ));
        display.message(format!("Waiting for {agent}..."));

        let (retry, outcome) = orchestrator
            .retry_with_ai(
                token,
                &result,
                &work_dir,
                attempt,
                &agent,
                model.as_deref(),
            )
            .await;

        if let Some(retry) = retry {
            result = retry.pipeline_result;
            artifact = save_artifact(&config, &work_dir, task, &result).await;
        }

        match outcome {
            Ok(()) => {
                display.finish();
                report(&config, &result, artifact.as_deref());
                eprintln!(
                    "{} Fixed by {agent} on attempt {attempt}",
                    style("✓").green()
                );
                return Ok(ExitCode::SUCCESS);
            },
            // Still failing, go again with the new diagnostics
            Err(Error::ValidationFailed { .. }) => {},
            Err(e) => {
                display.finish();
                report(&config, &result, artifact.as_deref());
                return Err(e);
            },
        }
    }

    display.finish();
    report(&config, &result, artifact.as_deref());
    eprintln!(
        "{} Still failing after {max_attempts} attempt(s)",
        style("✗").red().bold()
    );

    Ok(ExitCode::FAILURE)
}

/// Validate configuration.
pub fn validate() -> Result<ExitCode> {
    match Config::load() {
        Ok(config) => {
            eprintln!("{} Configuration is valid", style("✓").green());
            let runner_config = config.runner_config()?;
            for phase in Phase::ALL {
                eprintln!(
                    "  {:<11} {} command(s)",
                    phase.label(),
                    runner_config.commands_for(phase).len()
                );
            }
            eprintln!(
                "  {:<11} {} (up to {} attempts)",
                "Agent",
                config.retry.agent,
                config.retry.max_attempts
            );
            Ok(ExitCode::SUCCESS)
        },
        Err(Error::ConfigNotFound { path }) => {
            eprintln!(
                "{} Configuration not found: {}",
                style("!").yellow(),
                path.display()
            );
            eprintln!("  Run: avf init");
            Ok(ExitCode::FAILURE)
        },
        Err(e) => {
            eprintln!("{} Configuration validation failed: {e}", style("✗").red());
            Ok(ExitCode::FAILURE)
        },
    }
}

/// Show configuration.
pub fn config(raw: bool) -> Result<ExitCode> {
    match Config::find_config_file() {
        Ok(path) => {
            eprintln!("Configuration file: {}", path.display());

            if raw {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| Error::io("read config", e))?;
                eprintln!();
                std::io::stdout()
                    .write_all(content.as_bytes())
                    .map_err(|e| Error::io("write output", e))?;
            }

            Ok(ExitCode::SUCCESS)
        },
        Err(Error::ConfigNotFound { .. }) => {
            eprintln!("{} No configuration file found", style("!").yellow());
            eprintln!("  Run: avf init");
            Ok(ExitCode::FAILURE)
        },
        Err(e) => Err(e),
    }
}

/// Generate shell completions.
pub fn completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    clap_complete::generate(
        shell,
        &mut super::Cli::command(),
        "avf",
        &mut std::io::stdout(),
    );
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|e| Error::io("get current dir", e))
}

fn resolve_work_dir(dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => current_dir()?,
    };

    if !dir.is_dir() {
        return Err(Error::WorktreeNotFound { path: dir });
    }

    Ok(dir)
}

fn load_config(work_dir: &Path) -> Result<Config> {
    let config = Config::load_or_default_from(work_dir)?;
    if config.pipeline.is_empty() {
        eprintln!(
            "{} No commands configured - run `avf init` to create {CONFIG_FILE_NAME}",
            style("!").yellow()
        );
    }
    Ok(config)
}

/// Saves the result when artifacts are enabled. Failures only warn.
async fn save_artifact(
    config: &Config,
    work_dir: &Path,
    task: Option<&str>,
    result: &PipelineResult,
) -> Option<PathBuf> {
    if !config.artifacts.enabled {
        return None;
    }

    let saver = FsArtifactSaver::new(config.artifacts.resolve(work_dir));
    match saver.save(task.unwrap_or(DEFAULT_TASK_ID), result).await {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(error = %e, "Could not save validation artifact");
            None
        },
    }
}

fn report(config: &Config, result: &PipelineResult, artifact: Option<&Path>) {
    let text = format_result(result, artifact);
    eprintln!();
    if result.success {
        eprint!("{} {text}", style("✓").green().bold());
    } else {
        eprint!("{} {text}", style("✗").red().bold());
        BellNotifier::new(config.notify.bell).validation_failed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_work_dir_missing() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("gone");

        let err = resolve_work_dir(Some(&missing)).expect_err("missing dir");
        assert!(matches!(err, Error::WorktreeNotFound { path } if path == missing));
    }

    #[test]
    fn test_resolve_work_dir_existing() {
        let dir = TempDir::new().expect("tempdir");
        let resolved = resolve_work_dir(Some(dir.path())).expect("resolve");
        assert_eq!(resolved, dir.path());
    }

    #[tokio::test]
    async fn test_save_artifact_disabled() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.artifacts.enabled = false;

        let saved = save_artifact(&config, dir.path(), None, &PipelineResult::default()).await;
        assert!(saved.is_none());
    }

    #[tokio::test]
    async fn test_save_artifact_versions_per_task() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::default();
        let result = PipelineResult::default();

        let first = save_artifact(&config, dir.path(), Some("t-1"), &result)
            .await
            .expect("first");
        let second = save_artifact(&config, dir.path(), Some("t-1"), &result)
            .await
            .expect("second");

        assert!(first.ends_with("t-1/validation-1.json"));
        assert!(second.ends_with("t-1/validation-2.json"));
    }
}
