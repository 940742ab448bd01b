//! Human-readable validation report.

use crate::core::result::{CommandResult, PipelineResult};
use std::fmt::Write as _;
use std::path::Path;

/// Stdout beyond this many characters is cut from the report.
pub const STDOUT_BUDGET: usize = 2000;

/// Next steps offered when validation fails.
pub const SUGGESTED_ACTIONS: [&str; 3] = [
    "Retry with AI: avf fix",
    "Fix manually, then run: avf run",
    "Abandon the change",
];

/// Renders a pipeline result for the terminal.
///
/// `artifact` is where the full result was saved, if it was.
#[must_use]
pub fn format_result(result: &PipelineResult, artifact: Option<&Path>) -> String {
    let mut out = String::new();

    if result.success {
        let _ = writeln!(
            out,
            "Validation passed in {}",
            humantime::format_duration(round_to_millis(result.duration))
        );
        for (phase, reason) in &result.skip_reasons {
            let _ = writeln!(out, "  {} skipped: {reason}", phase.label());
        }
        return out;
    }

    let step = result.failed_step_name.map_or("unknown", |p| p.name());
    let _ = writeln!(out, "Validation failed at {step} step");

    for failed in result.failed_results() {
        out.push('\n');
        write_failure(&mut out, failed, artifact);
    }

    if let Some(path) = artifact {
        let _ = writeln!(out, "\nFull results: {}", path.display());
    }

    out.push_str("\nSuggested actions:\n");
    for (i, action) in SUGGESTED_ACTIONS.iter().enumerate() {
        let _ = writeln!(out, "  {}. {action}", i + 1);
    }

    out
}

fn write_failure(out: &mut String, failed: &CommandResult, artifact: Option<&Path>) {
    let _ = writeln!(out, "Command: {}", failed.command);
    let _ = writeln!(out, "Exit code: {}", failed.exit_code);
    if let Some(ref error) = failed.error {
        let _ = writeln!(out, "Error: {error}");
    }

    // Stdout stands in for empty stderr and is then not repeated below.
    let stdout = failed.stdout.trim_end();
    let stderr = failed.stderr.trim_end();
    if stderr.trim_start().is_empty() {
        if !stdout.is_empty() {
            write_stdout(out, stdout, artifact);
        }
        return;
    }

    let _ = writeln!(out, "{}", indent(stderr));

    if !stdout.is_empty() {
        let _ = writeln!(out, "Stdout:");
        write_stdout(out, stdout, artifact);
    }
}

/// Writes stdout cut at [`STDOUT_BUDGET`] characters.
fn write_stdout(out: &mut String, stdout: &str, artifact: Option<&Path>) {
    if stdout.chars().count() <= STDOUT_BUDGET {
        let _ = writeln!(out, "{}", indent(stdout));
        return;
    }

    let cut = stdout
        .char_indices()
        .nth(STDOUT_BUDGET)
        .map_or(stdout.len(), |(idx, _)| idx);
    let _ = writeln!(out, "{}", indent(&stdout[..cut]));
    match artifact {
        Some(path) => {
            let _ = writeln!(out, "    ... (truncated, see {})", path.display());
        },
        None => out.push_str("    ... (truncated)\n"),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn round_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
