//! Command-line interface for agent-verify.
//!
//! This module provides the `avf` CLI with subcommands for:
//! - `init`: Initialize configuration
//! - `run`: Run the validation pipeline
//! - `fix`: Run the pipeline and let an AI agent fix failures
//! - `validate`: Validate configuration
//! - `config`: Show configuration
//! - `completions`: Generate shell completions

mod commands;
mod progress;

use crate::core::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Post-edit verification for AI-driven code changes.
#[derive(Debug, Parser)]
#[command(
    name = "avf",
    author,
    version,
    about = "Post-edit verification for AI-driven code changes",
    long_about = r#"
agent-verify (avf) runs your project's format, lint, test and pre-commit
commands after an AI agent edits the code, and can hand failures back to
the agent until everything passes.

Pipeline:
  format  ->  lint + test (in parallel)  ->  pre-commit

Quick start:
  avf init --preset rust   # Create agent-verify.toml
  avf run                  # Validate the working tree
  avf fix                  # Validate, then let the agent fix failures
"#,
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use color output.
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,
}

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Always use color.
    Always,
    /// Auto-detect color support.
    #[default]
    Auto,
    /// Never use color.
    Never,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize agent-verify configuration.
    #[command(visible_alias = "i")]
    Init {
        /// Use a preset configuration.
        #[arg(short, long, value_parser = ["python", "node", "rust", "go"])]
        preset: Option<String>,

        /// Overwrite existing configuration.
        #[arg(short, long)]
        force: bool,
    },

    /// Run the validation pipeline.
    #[command(visible_alias = "r")]
    Run {
        /// Worktree to validate (defaults to the current directory).
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Task id used to group saved results.
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Run the pipeline and let an AI agent fix failures.
    #[command(visible_alias = "f")]
    Fix {
        /// Worktree to validate (defaults to the current directory).
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Task id used to group saved results.
        #[arg(short, long)]
        task: Option<String>,

        /// Agent CLI to invoke.
        #[arg(short, long, value_parser = ["claude", "codex"])]
        agent: Option<String>,

        /// Model passed to the agent.
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Validate the configuration file.
    #[command(visible_alias = "v")]
    Validate,

    /// Show configuration file location and contents.
    Config {
        /// Output raw TOML.
        #[arg(long)]
        raw: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Runs the CLI.
pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    setup_logging(cli.verbose, cli.quiet);

    // Set up color
    setup_color(cli.color);

    let token = cancel_on_interrupt();

    // If no subcommand, run the default action (same as `avf run`)
    match cli.command {
        Some(Commands::Init { preset, force }) => commands::init(preset.as_deref(), force),
        Some(Commands::Run { dir, task }) => {
            commands::run(&token, dir.as_deref(), task.as_deref()).await
        },
        Some(Commands::Fix {
            dir,
            task,
            agent,
            model,
        }) => {
            commands::fix(
                &token,
                dir.as_deref(),
                task.as_deref(),
                agent.as_deref(),
                model.as_deref(),
            )
            .await
        },
        Some(Commands::Validate) => commands::validate(),
        Some(Commands::Config { raw }) => commands::config(raw),
        Some(Commands::Completions { shell }) => {
            commands::completions(shell);
            Ok(ExitCode::SUCCESS)
        },
        None => commands::run(&token, None, None).await,
    }
}

/// Returns a token cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let watcher = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling running commands");
            watcher.cancel();
        }
    });

    token
}

/// Sets up logging based on verbosity flags.
fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Sets up color output.
fn setup_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Always => {
            console::set_colors_enabled(true);
            console::set_colors_enabled_stderr(true);
        },
        ColorChoice::Never => {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        },
        ColorChoice::Auto => {
            // Let console crate auto-detect
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_help() {
        let cli = Cli::try_parse_from(["avf", "--help"]);
        // --help causes early exit, so this will be an error
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_version() {
        let cli = Cli::try_parse_from(["avf", "--version"]);
        assert!(cli.is_err());
    }

    // =========================================================================
    // Subcommand parsing tests
    // =========================================================================

    #[test]
    fn test_parse_init() {
        let cli = Cli::try_parse_from(["avf", "init"]).expect("parse init");
        assert!(matches!(
            cli.command,
            Some(Commands::Init {
                preset: None,
                force: false
            })
        ));
    }

    #[test]
    fn test_parse_init_with_preset_and_force() {
        let cli =
            Cli::try_parse_from(["avf", "init", "--preset", "python", "--force"]).expect("parse");
        assert!(matches!(
            cli.command,
            Some(Commands::Init {
                preset: Some(_),
                force: true
            })
        ));
    }

    #[test]
    fn test_parse_init_invalid_preset() {
        let result = Cli::try_parse_from(["avf", "init", "--preset", "invalid"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["avf", "run"]).expect("parse");
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                dir: None,
                task: None
            })
        ));
    }

    #[test]
    fn test_parse_run_with_dir_and_task() {
        let cli = Cli::try_parse_from(["avf", "run", "--dir", "/tmp/wt", "--task", "t-1"])
            .expect("parse");
        assert!(matches!(
            &cli.command,
            Some(Commands::Run { dir: Some(dir), task: Some(task) })
                if dir == &PathBuf::from("/tmp/wt") && task == "t-1"
        ));
    }

    #[test]
    fn test_parse_run_alias() {
        let cli = Cli::try_parse_from(["avf", "r"]).expect("parse run alias");
        assert!(matches!(cli.command, Some(Commands::Run { .. })));
    }

    #[test]
    fn test_parse_fix() {
        let cli = Cli::try_parse_from(["avf", "fix", "--agent", "codex", "--model", "o3"])
            .expect("parse");
        assert!(matches!(
            &cli.command,
            Some(Commands::Fix { agent: Some(agent), model: Some(model), .. })
                if agent == "codex" && model == "o3"
        ));
    }

    #[test]
    fn test_parse_fix_invalid_agent() {
        let result = Cli::try_parse_from(["avf", "fix", "--agent", "gemini"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_validate_alias() {
        let cli = Cli::try_parse_from(["avf", "v"]).expect("parse validate alias");
        assert!(matches!(cli.command, Some(Commands::Validate)));
    }

    #[test]
    fn test_parse_config_raw() {
        let cli = Cli::try_parse_from(["avf", "config", "--raw"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Config { raw: true })));
    }

    #[test]
    fn test_parse_completions() {
        for shell in ["bash", "zsh", "fish"] {
            let cli = Cli::try_parse_from(["avf", "completions", shell]).expect("parse");
            assert!(matches!(cli.command, Some(Commands::Completions { .. })));
        }
    }

    #[test]
    fn test_parse_no_subcommand() {
        let cli = Cli::try_parse_from(["avf"]).expect("parse");
        assert!(cli.command.is_none());
    }

    // =========================================================================
    // Global flags tests
    // =========================================================================

    #[test]
    fn test_parse_verbose_flag() {
        let cli = Cli::try_parse_from(["avf", "--verbose", "validate"]).expect("parse");
        assert!(cli.verbose);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_parse_short_quiet() {
        let cli = Cli::try_parse_from(["avf", "-q", "run"]).expect("parse");
        assert!(cli.quiet);
    }

    #[test]
    fn test_parse_color() {
        let cli = Cli::try_parse_from(["avf", "--color", "never", "run"]).expect("parse");
        assert_eq!(cli.color, ColorChoice::Never);
        let cli = Cli::try_parse_from(["avf", "run"]).expect("parse");
        assert_eq!(cli.color, ColorChoice::Auto);
    }

    #[test]
    fn test_all_valid_presets_accepted() {
        for preset in crate::presets::available() {
            let result = Cli::try_parse_from(["avf", "init", "--preset", preset]);
            assert!(result.is_ok(), "Preset '{}' should be accepted", preset);
        }
    }
}
