//! Terminal rendering of pipeline progress.

use crate::core::runner::{PhaseStatus, ProgressCallback, ProgressEvent};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Spinner for the running phase plus one line per finished phase.
#[derive(Debug, Clone)]
pub struct PhaseDisplay {
    bar: ProgressBar,
}

impl PhaseDisplay {
    /// Starts the display. Without a spinner only phase lines are printed.
    pub fn start(spinner: bool) -> Self {
        if !spinner {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .ok()
                .unwrap_or_else(ProgressStyle::default_spinner),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Returns a progress callback drawing onto this display.
    pub fn callback(&self) -> ProgressCallback {
        let display = self.clone();
        Arc::new(move |event: &ProgressEvent| {
            if let Some(line) = render(event) {
                display.line(line);
            } else {
                display.bar.set_message(format!(
                    "[{}/{}] {}...",
                    event.info.current_step,
                    event.info.total_steps,
                    event.phase.label()
                ));
            }
        })
    }

    /// Prints a permanent line above the spinner.
    pub fn line(&self, line: impl std::fmt::Display) {
        // Hidden bars swallow println, suspend still runs the closure.
        self.bar.suspend(|| eprintln!("{line}"));
    }

    /// Sets the spinner message outside of a pipeline run.
    pub fn message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Removes the spinner.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Returns the permanent line for a finished phase, `None` while it runs.
fn render(event: &ProgressEvent) -> Option<String> {
    let step = format!("[{}/{}]", event.info.current_step, event.info.total_steps);
    let label = event.phase.label();
    let elapsed = humantime::format_duration(Duration::from_millis(
        u64::try_from(event.info.elapsed.as_millis()).unwrap_or(u64::MAX),
    ));

    match event.status {
        PhaseStatus::Starting => None,
        PhaseStatus::Completed => Some(format!(
            "{} {step} {label} ({elapsed})",
            style("✓").green()
        )),
        PhaseStatus::Failed => Some(format!(
            "{} {step} {label} ({elapsed})",
            style("✗").red()
        )),
        PhaseStatus::Skipped => Some(format!(
            "{} {step} {label} skipped: {}",
            style("•").cyan(),
            event.message.as_deref().unwrap_or("not run")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::Phase;
    use crate::core::runner::ProgressInfo;

    fn event(status: PhaseStatus, message: Option<&str>) -> ProgressEvent {
        ProgressEvent {
            phase: Phase::PreCommit,
            status,
            info: ProgressInfo {
                current_step: 4,
                total_steps: 4,
                elapsed: Duration::from_millis(1200),
            },
            message: message.map(ToString::to_string),
        }
    }

    #[test]
    fn test_starting_has_no_line() {
        assert!(render(&event(PhaseStatus::Starting, None)).is_none());
    }

    #[test]
    fn test_completed_line() {
        console::set_colors_enabled(false);
        let line = render(&event(PhaseStatus::Completed, None)).expect("line");
        assert!(line.contains("[4/4] Pre-commit (1s 200ms)"));
    }

    #[test]
    fn test_skipped_line_carries_reason() {
        let line = render(&event(PhaseStatus::Skipped, Some("pre-commit not installed")))
            .expect("line");
        assert!(line.contains("Pre-commit skipped: pre-commit not installed"));
    }
}
