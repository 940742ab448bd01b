//! Git staging of hook-modified files.
//!
//! Pre-commit hooks rewrite files in place (formatters, end-of-file fixers,
//! ...). This module finds those files through `git status --porcelain -z` and
//! stages them, retrying while the repository index is locked and falling
//! back to per-file staging when a batch `git add` fails for other reasons.

use crate::core::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Attempts made while the index lock is held.
pub const MAX_LOCK_ATTEMPTS: u32 = 5;

/// Delay before the first lock retry; doubles on each further attempt.
pub const LOCK_BACKOFF: Duration = Duration::from_millis(100);

/// Case-insensitive fragments that identify index lock contention.
const LOCK_SIGNATURES: &[&str] = &[
    "index.lock",
    ".lock': file exists",
    "another git process",
    "another process",
];

/// Runs porcelain git commands.
#[async_trait]
pub trait GitPorcelainRunner: Send + Sync {
    /// Runs `git <args>` in `work_dir`.
    ///
    /// Returns stdout on success. A non-zero exit becomes
    /// [`Error::GitOperation`] whose message holds the combined output.
    async fn run(&self, work_dir: &Path, args: &[String]) -> Result<String>;
}

/// [`GitPorcelainRunner`] backed by the `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemGit;

#[async_trait]
impl GitPorcelainRunner for SystemGit {
    async fn run(&self, work_dir: &Path, args: &[String]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(work_dir)
            .output()
            .await
            .map_err(|e| Error::io("run git", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{stdout}{stderr}");
            let operation = args.first().map_or("git", String::as_str);
            return Err(Error::git(operation, combined.trim().to_string()));
        }

        Ok(stdout)
    }
}

/// Stages files touched by validation hooks.
#[async_trait]
pub trait Stager: Send + Sync {
    /// Stages every untracked or worktree-modified file in `work_dir`.
    async fn stage_modified_files(&self, work_dir: &Path) -> Result<StageReport>;
}

/// What a staging pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Files that were staged.
    pub staged: Vec<String>,
    /// Files that could not be staged.
    pub failed: Vec<FailedFile>,
}

/// A file the per-file fallback could not stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    /// Path relative to the worktree.
    pub path: String,
    /// Diagnostic category.
    pub kind: StagingFailureKind,
    /// Failure text.
    pub message: String,
}

/// Diagnostic category for a failed `git add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingFailureKind {
    /// Path no longer exists or matches nothing.
    FileNotFound,
    /// Filesystem refused access.
    PermissionDenied,
    /// Git rejected the path.
    InvalidPath,
    /// No space left on the device.
    DiskFull,
    /// Anything else.
    Unknown,
}

impl StagingFailureKind {
    /// Returns the snake_case name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidPath => "invalid_path",
            Self::DiskFull => "disk_full",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StagingFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true if the failure text looks like index lock contention.
///
/// This is a heuristic over git's English messages, not an exhaustive
/// classifier.
#[must_use]
pub fn is_lock_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    LOCK_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Buckets a `git add` failure for diagnostics.
#[must_use]
pub fn classify_staging_error(message: &str) -> StagingFailureKind {
    let lower = message.to_lowercase();
    if lower.contains("did not match any files")
        || lower.contains("no such file")
        || lower.contains("does not exist")
    {
        StagingFailureKind::FileNotFound
    } else if lower.contains("permission denied") {
        StagingFailureKind::PermissionDenied
    } else if lower.contains("invalid path")
        || lower.contains("outside repository")
        || lower.contains("beyond a symbolic link")
    {
        StagingFailureKind::InvalidPath
    } else if lower.contains("no space left") || lower.contains("disk quota") {
        StagingFailureKind::DiskFull
    } else {
        StagingFailureKind::Unknown
    }
}

/// Arguments for a NUL-separated porcelain status that lists every
/// untracked file on its own rather than collapsing untracked directories.
///
/// `-z` also turns off path quoting, so non-ASCII names come back verbatim.
#[must_use]
pub fn status_args() -> Vec<String> {
    ["status", "--porcelain", "-z", "--untracked-files=all"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Extracts paths worth staging from `git status --porcelain -z` output.
///
/// Untracked (`??`) entries and entries modified in the worktree (` M`,
/// `MM`, `AM`, ...) are kept. Entries only modified in the index (`M `) are
/// already staged and are skipped.
#[must_use]
pub fn parse_porcelain(output: &str) -> Vec<String> {
    porcelain_entries(output)
        .into_iter()
        .filter(|&(index, worktree, _)| (index == b'?' && worktree == b'?') || worktree == b'M')
        .map(|(_, _, path)| path.to_string())
        .collect()
}

/// Extracts every path from `git status --porcelain -z` output, whatever
/// its status.
#[must_use]
pub fn porcelain_paths(output: &str) -> Vec<String> {
    porcelain_entries(output)
        .into_iter()
        .map(|(_, _, path)| path.to_string())
        .collect()
}

/// Splits NUL-separated porcelain records into status bytes and path.
///
/// Renames and copies yield the new path; the source path record that
/// follows them is consumed.
fn porcelain_entries(output: &str) -> Vec<(u8, u8, &str)> {
    let mut entries = Vec::new();
    let mut records = output.split('\0');

    while let Some(record) = records.next() {
        let bytes = record.as_bytes();
        if bytes.len() < 4 {
            continue;
        }

        let (index, worktree) = (bytes[0], bytes[1]);
        if matches!(index, b'R' | b'C') || matches!(worktree, b'R' | b'C') {
            records.next();
        }

        if let Some(path) = record.get(3..).filter(|p| !p.is_empty()) {
            entries.push((index, worktree, path));
        }
    }

    entries
}

/// Git-backed [`Stager`] with lock retry and per-file fallback.
#[derive(Clone)]
pub struct GitStager {
    git: Arc<dyn GitPorcelainRunner>,
    max_lock_attempts: u32,
    lock_backoff: Duration,
}

impl std::fmt::Debug for GitStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStager")
            .field("max_lock_attempts", &self.max_lock_attempts)
            .field("lock_backoff", &self.lock_backoff)
            .finish_non_exhaustive()
    }
}

impl Default for GitStager {
    fn default() -> Self {
        Self::new(Arc::new(SystemGit))
    }
}

impl GitStager {
    /// Creates a stager over the given git runner.
    #[must_use]
    pub fn new(git: Arc<dyn GitPorcelainRunner>) -> Self {
        Self {
            git,
            max_lock_attempts: MAX_LOCK_ATTEMPTS,
            lock_backoff: LOCK_BACKOFF,
        }
    }

    /// Sets the base lock backoff.
    #[must_use]
    pub const fn lock_backoff(mut self, backoff: Duration) -> Self {
        self.lock_backoff = backoff;
        self
    }

    /// Runs a git command, retrying with backoff while the index is locked.
    async fn run_with_lock_retry(&self, work_dir: &Path, args: &[String]) -> Result<String> {
        let operation = args.first().map_or("git", String::as_str);
        let mut attempt = 1;

        loop {
            let err = match self.git.run(work_dir, args).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };

            let message = err.to_string();
            if !is_lock_error(&message) {
                return Err(err);
            }

            if attempt >= self.max_lock_attempts {
                tracing::error!(operation, attempts = attempt, "Index lock never released");
                return Err(Error::LockRetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message,
                });
            }

            let delay = self
                .lock_backoff
                .saturating_mul(1_u32 << (attempt - 1).min(6));
            tracing::warn!(
                operation,
                attempt,
                max_attempts = self.max_lock_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Git index locked, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn stage_individually(&self, work_dir: &Path, files: Vec<String>) -> StageReport {
        let mut report = StageReport::default();

        for file in files {
            let args = add_args(std::slice::from_ref(&file));
            match self.run_with_lock_retry(work_dir, &args).await {
                Ok(_) => report.staged.push(file),
                Err(e) => {
                    let message = e.to_string();
                    let kind = classify_staging_error(&message);
                    tracing::debug!(file = %file, kind = %kind, "Could not stage file");
                    report.failed.push(FailedFile {
                        path: file,
                        kind,
                        message,
                    });
                },
            }
        }

        report
    }
}

fn add_args(files: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(files.len() + 2);
    args.push("add".to_string());
    args.push("--".to_string());
    args.extend(files.iter().cloned());
    args
}

#[async_trait]
impl Stager for GitStager {
    async fn stage_modified_files(&self, work_dir: &Path) -> Result<StageReport> {
        let status = self
            .git
            .run(work_dir, &status_args())
            .await?;

        let files = parse_porcelain(&status);
        if files.is_empty() {
            tracing::debug!("No hook-modified files to stage");
            return Ok(StageReport::default());
        }

        match self.run_with_lock_retry(work_dir, &add_args(&files)).await {
            Ok(_) => {
                tracing::info!(files = files.len(), "Staged hook-modified files");
                return Ok(StageReport {
                    staged: files,
                    failed: Vec::new(),
                });
            },
            Err(e @ Error::LockRetryExhausted { .. }) => return Err(e),
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    kind = %classify_staging_error(&message),
                    error = %message,
                    files = files.len(),
                    "Batch staging failed, staging files individually"
                );
            },
        }

        let report = self.stage_individually(work_dir, files).await;

        if report.staged.is_empty() {
            let message = report
                .failed
                .last()
                .map(|f| f.message.clone())
                .unwrap_or_default();
            return Err(Error::StagingFailed {
                failed: report.failed.into_iter().map(|f| f.path).collect(),
                message,
            });
        }

        if !report.failed.is_empty() {
            let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
            tracing::warn!(
                staged = report.staged.len(),
                failed = ?failed,
                "Some hook-modified files could not be staged"
            );
        }

        Ok(report)
    }
}
