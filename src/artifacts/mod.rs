//! Validation artifact persistence.
//!
//! Every pipeline run can be saved as indented JSON under
//! `<dir>/<task-id>/validation-<n>.json`. Versions only ever grow, so a
//! fix loop leaves one file per attempt.

use crate::core::error::{Error, Result};
use crate::core::result::PipelineResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Task id used when the caller does not name one.
pub const DEFAULT_TASK_ID: &str = "default";

const PREFIX: &str = "validation-";
const SUFFIX: &str = ".json";

/// Persists pipeline results.
#[async_trait]
pub trait ArtifactSaver: Send + Sync {
    /// Saves `result` as the next version for `task_id`, returning its path.
    async fn save(&self, task_id: &str, result: &PipelineResult) -> Result<PathBuf>;
}

/// [`ArtifactSaver`] writing versioned JSON files.
#[derive(Debug, Clone)]
pub struct FsArtifactSaver {
    root: PathBuf,
}

impl FsArtifactSaver {
    /// Creates a saver rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding a task's artifacts.
    #[must_use]
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(sanitize_task_id(task_id))
    }

    /// Returns the highest saved version for a task, 0 if none.
    pub async fn latest_version(&self, task_id: &str) -> Result<u32> {
        let dir = self.task_dir(task_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io("read artifact dir", e)),
        };

        let mut latest = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io("read artifact dir", e))?
        {
            if let Some(version) = entry.file_name().to_str().and_then(parse_version) {
                latest = latest.max(version);
            }
        }

        Ok(latest)
    }
}

#[async_trait]
impl ArtifactSaver for FsArtifactSaver {
    async fn save(&self, task_id: &str, result: &PipelineResult) -> Result<PathBuf> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io("create artifact dir", e))?;
        write_gitignore(&self.root).await;

        let json = serde_json::to_string_pretty(result).map_err(|e| Error::Internal {
            message: format!("Failed to serialize validation result: {e}"),
        })?;

        let mut version = self.latest_version(task_id).await? + 1;
        loop {
            let path = dir.join(format!("{PREFIX}{version}{SUFFIX}"));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match file {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())
                        .await
                        .map_err(|e| Error::io("write artifact", e))?;
                    file.flush()
                        .await
                        .map_err(|e| Error::io("write artifact", e))?;

                    tracing::debug!(path = %path.display(), version, "Saved validation artifact");
                    return Ok(path);
                },
                // Lost a race with a concurrent writer.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => version += 1,
                Err(e) => return Err(Error::io("create artifact", e)),
            }
        }
    }
}

/// Keeps artifacts saved inside a worktree out of `git status`.
async fn write_gitignore(root: &Path) {
    let path = root.join(".gitignore");
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return;
    }
    if let Err(e) = tokio::fs::write(&path, "*\n").await {
        tracing::debug!(error = %e, "Could not write artifact .gitignore");
    }
}

fn parse_version(name: &str) -> Option<u32> {
    name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

/// Maps a task id onto a single safe path component.
fn sanitize_task_id(task_id: &str) -> String {
    let cleaned: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_TASK_ID.to_string()
    } else {
        cleaned
    }
}
