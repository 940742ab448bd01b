//! Pre-commit tool discovery.
//!
//! The pipeline only runs its pre-commit phase when the hook framework is
//! actually installed. [`ToolChecker`] answers that question; the default
//! [`PathToolChecker`] looks the binary up on `PATH`.

use crate::core::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Default hook framework binary.
pub const DEFAULT_TOOL: &str = "pre-commit";

/// Path to the pre-commit config file.
pub const PRE_COMMIT_CONFIG: &str = ".pre-commit-config.yaml";

/// Installation status of an external tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolStatus {
    /// Whether the tool was found.
    pub installed: bool,
    /// Reported version, when the tool prints one.
    pub version: Option<String>,
}

impl ToolStatus {
    /// Status for a tool that is not installed.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            installed: false,
            version: None,
        }
    }
}

/// Reports whether an external tool is available.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolChecker: Send + Sync {
    /// Checks whether `name` is installed.
    async fn is_installed(&self, name: &str) -> Result<ToolStatus>;
}

/// [`ToolChecker`] that resolves binaries through `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathToolChecker;

#[async_trait]
impl ToolChecker for PathToolChecker {
    async fn is_installed(&self, name: &str) -> Result<ToolStatus> {
        let Ok(path) = which::which(name) else {
            return Ok(ToolStatus::missing());
        };

        let output = Command::new(&path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| Error::io(format!("run {name} --version"), e))?;

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);

        tracing::debug!(tool = name, path = %path.display(), version = ?version, "Tool found");

        Ok(ToolStatus {
            installed: true,
            version,
        })
    }
}

/// Checks if a pre-commit config exists.
#[must_use]
pub fn config_exists(repo_root: &Path) -> bool {
    repo_root.join(PRE_COMMIT_CONFIG).exists()
}
