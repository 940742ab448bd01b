//! # agent-verify
//!
//! Post-edit verification for AI-driven code changes.
//!
//! After a coding agent edits a worktree, `agent-verify` runs the project's
//! format, lint, test and pre-commit commands. When something fails it can
//! hand the failure back to the agent and re-validate, up to a fixed number
//! of attempts.
//!
//! ## Features
//!
//! - **Phased pipeline**: format first, then lint and test side by side, then
//!   pre-commit hooks when the hook tool is installed
//! - **Complete diagnostics**: a failing linter never hides the test results
//! - **Resilient staging**: hook-rewritten files are restaged, riding out
//!   git index lock contention
//! - **Bounded AI retry**: failures are condensed into a capped prompt for
//!   an agent CLI, then the whole pipeline runs again
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_verify::{Config, PipelineRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> agent_verify::Result<()> {
//!     let config = Config::load_or_default()?;
//!     let runner = PipelineRunner::new(config.runner_config()?);
//!
//!     let token = CancellationToken::new();
//!     let (result, outcome) = runner.run(&token, std::path::Path::new(".")).await;
//!
//!     println!("{}", agent_verify::core::report::format_result(&result, None));
//!     outcome
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/agent-verify/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod artifacts;
pub mod checks;
pub mod cli;
pub mod config;
pub mod core;
pub mod notify;
pub mod presets;

// Re-export main types for convenience
pub use config::Config;
pub use core::error::{Error, Result};
pub use core::result::{CommandResult, Phase, PipelineResult};
pub use core::retry::{RetryOrchestrator, RetryResult};
pub use core::runner::{PipelineRunner, RunnerConfig};
