//! Coding-agent CLI integration.
//!
//! [`AgentCliRunner`] implements [`AiRunner`] by running a local agent CLI
//! non-interactively inside the worktree. Files the agent touched are found
//! by comparing the dirty set reported by git before and after the run.

use crate::core::error::{Error, Result};
use crate::core::git::{porcelain_paths, status_args, GitPorcelainRunner, SystemGit};
use crate::core::retry::{AiRequest, AiResult, AiRunner};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// The `claude` CLI.
pub const CLAUDE: &str = "claude";

/// The `codex` CLI.
pub const CODEX: &str = "codex";

/// Agents [`AgentCliRunner`] knows how to drive.
pub const SUPPORTED_AGENTS: &[&str] = &[CLAUDE, CODEX];

/// Default deadline for one agent run.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Lines of agent stderr kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Returns true if `agent` is a supported agent name.
#[must_use]
pub fn is_supported(agent: &str) -> bool {
    SUPPORTED_AGENTS.contains(&agent)
}

/// Builds the non-interactive argument list for an agent.
pub fn agent_args(agent: &str, prompt: &str, model: Option<&str>) -> Result<Vec<String>> {
    let mut args: Vec<String> = match agent {
        CLAUDE => vec![
            "-p".to_string(),
            prompt.to_string(),
            "--permission-mode".to_string(),
            "acceptEdits".to_string(),
        ],
        CODEX => vec![
            "exec".to_string(),
            "--full-auto".to_string(),
            prompt.to_string(),
        ],
        other => {
            return Err(Error::UnknownAgent {
                agent: other.to_string(),
            })
        },
    };

    if let Some(model) = model {
        let flag = if agent == CLAUDE { "--model" } else { "-m" };
        args.push(flag.to_string());
        args.push(model.to_string());
    }

    Ok(args)
}

/// [`AiRunner`] that spawns an agent CLI.
#[derive(Clone)]
pub struct AgentCliRunner {
    git: Arc<dyn GitPorcelainRunner>,
    timeout: Duration,
    program: Option<String>,
}

impl std::fmt::Debug for AgentCliRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCliRunner")
            .field("timeout", &self.timeout)
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl Default for AgentCliRunner {
    fn default() -> Self {
        Self::new(Arc::new(SystemGit))
    }
}

impl AgentCliRunner {
    /// Creates a runner that uses `git` to detect changed files.
    #[must_use]
    pub fn new(git: Arc<dyn GitPorcelainRunner>) -> Self {
        Self {
            git,
            timeout: DEFAULT_AGENT_TIMEOUT,
            program: None,
        }
    }

    /// Sets the deadline for one agent run.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `program` instead of the binary named after the agent.
    #[must_use]
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Fingerprints every dirty file so edits to already-dirty files show up.
    async fn snapshot(&self, work_dir: &Path) -> BTreeMap<String, u64> {
        let status = match self
            .git
            .run(work_dir, &status_args())
            .await
        {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(error = %e, "Could not read worktree status");
                return BTreeMap::new();
            },
        };

        let mut hashes = BTreeMap::new();
        for path in porcelain_paths(&status) {
            let mut hasher = DefaultHasher::new();
            tokio::fs::read(work_dir.join(&path))
                .await
                .unwrap_or_default()
                .hash(&mut hasher);
            hashes.insert(path, hasher.finish());
        }
        hashes
    }
}

fn changed_between(before: &BTreeMap<String, u64>, after: &BTreeMap<String, u64>) -> Vec<String> {
    let touched = after
        .iter()
        .filter(|(path, hash)| before.get(*path) != Some(*hash))
        .map(|(path, _)| path.clone());
    let reverted = before
        .keys()
        .filter(|path| !after.contains_key(*path))
        .cloned();

    let mut changed: Vec<String> = touched.chain(reverted).collect();
    changed.sort();
    changed
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl AiRunner for AgentCliRunner {
    async fn run(&self, request: AiRequest) -> Result<AiResult> {
        let args = agent_args(&request.agent, &request.prompt, request.model.as_deref())?;
        let program = self.program.clone().unwrap_or_else(|| request.agent.clone());
        let work_dir = request.working_dir.as_path();

        let before = self.snapshot(work_dir).await;

        tracing::debug!(program = %program, model = ?request.model, "Spawning agent");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::io(format!("spawn agent '{program}'"), e)),
            Err(_) => {
                return Err(Error::CommandTimeout {
                    command: program,
                    timeout: humantime::format_duration(self.timeout).to_string(),
                })
            },
        };

        if !output.status.success() {
            return Err(Error::command_failed(
                "agent",
                program,
                stderr_tail(&output.stderr),
                output.status.code(),
            ));
        }

        let after = self.snapshot(work_dir).await;
        let files_changed = changed_between(&before, &after);

        tracing::info!(agent = %request.agent, files = files_changed.len(), "Agent run finished");

        Ok(AiResult {
            success: true,
            files_changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::git::tests::{create_test_repo, ScriptedGit};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn request(agent: &str, dir: &Path) -> AiRequest {
        AiRequest {
            agent: agent.to_string(),
            model: None,
            prompt: "fix it".to_string(),
            working_dir: dir.to_path_buf(),
        }
    }

    // =========================================================================
    // agent_args tests
    // =========================================================================

    #[rstest]
    #[case(CLAUDE, None, &["-p", "fix", "--permission-mode", "acceptEdits"])]
    #[case(CLAUDE, Some("opus"), &["-p", "fix", "--permission-mode", "acceptEdits", "--model", "opus"])]
    #[case(CODEX, None, &["exec", "--full-auto", "fix"])]
    #[case(CODEX, Some("o3"), &["exec", "--full-auto", "fix", "-m", "o3"])]
    fn test_agent_args(
        #[case] agent: &str,
        #[case] model: Option<&str>,
        #[case] expected: &[&str],
    ) {
        let args = agent_args(agent, "fix", model).expect("known agent");
        assert_eq!(args, expected);
    }

    #[test]
    fn test_agent_args_unknown() {
        assert!(matches!(
            agent_args("gemini", "fix", None),
            Err(Error::UnknownAgent { ref agent }) if agent == "gemini"
        ));
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("claude"));
        assert!(is_supported("codex"));
        assert!(!is_supported(""));
    }

    // =========================================================================
    // changed_between tests
    // =========================================================================

    #[test]
    fn test_changed_between() {
        let before: BTreeMap<String, u64> =
            [("a.rs".to_string(), 1), ("b.rs".to_string(), 2), ("c.rs".to_string(), 3)].into();
        let after: BTreeMap<String, u64> =
            [("a.rs".to_string(), 1), ("b.rs".to_string(), 9), ("d.rs".to_string(), 4)].into();

        assert_eq!(changed_between(&before, &after), vec!["b.rs", "c.rs", "d.rs"]);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    // =========================================================================
    // AgentCliRunner tests
    // =========================================================================

    #[tokio::test]
    async fn test_unknown_agent_never_spawns() {
        let temp = TempDir::new().expect("create temp dir");
        let git = Arc::new(ScriptedGit::new(|_| Ok(String::new())));
        let runner = AgentCliRunner::new(git.clone());

        let err = runner
            .run(request("gemini", temp.path()))
            .await
            .expect_err("unknown agent");

        assert!(matches!(err, Error::UnknownAgent { .. }));
        assert!(git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let temp = TempDir::new().expect("create temp dir");
        let git = Arc::new(ScriptedGit::new(|_| Ok(String::new())));
        let runner = AgentCliRunner::new(git).program("definitely_not_a_command_12345");

        let err = runner
            .run(request(CLAUDE, temp.path()))
            .await
            .expect_err("missing binary");

        assert!(matches!(err, Error::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_files_changed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("create temp dir");
        let script = temp.path().join("fake-agent.sh");
        std::fs::write(&script, "#!/bin/sh\necho fixed > lib.rs\n").expect("write script");
        let mut perms = std::fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");
        std::fs::write(temp.path().join("lib.rs"), "broken").expect("write lib");

        let git = Arc::new(ScriptedGit::new(|_| Ok(" M lib.rs\0".to_string())));
        let runner = AgentCliRunner::new(git).program(script.to_string_lossy());

        let result = runner
            .run(request(CODEX, temp.path()))
            .await
            .expect("agent succeeds");

        assert!(result.success);
        assert_eq!(result.files_changed, vec!["lib.rs"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_new_file_in_untracked_dir() {
        use std::os::unix::fs::PermissionsExt;

        let repo = create_test_repo();
        std::fs::create_dir(repo.path().join("gen")).expect("create dir");
        std::fs::write(repo.path().join("gen/old.rs"), "old").expect("write old");

        let bin = TempDir::new().expect("create bin dir");
        let script = bin.path().join("fake-agent.sh");
        std::fs::write(&script, "#!/bin/sh\necho new > gen/new.rs\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let runner = AgentCliRunner::new(Arc::new(SystemGit)).program(script.to_string_lossy());

        let result = runner
            .run(request(CLAUDE, repo.path()))
            .await
            .expect("agent succeeds");

        assert_eq!(result.files_changed, vec!["gen/new.rs"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_agent_reports_exit_code() {
        let temp = TempDir::new().expect("create temp dir");
        let git = Arc::new(ScriptedGit::new(|_| Ok(String::new())));
        let runner = AgentCliRunner::new(git).program("false");

        let err = runner
            .run(request(CLAUDE, temp.path()))
            .await
            .expect_err("agent fails");

        assert!(matches!(err, Error::CommandFailed { exit_code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_agent_timeout() {
        let temp = TempDir::new().expect("create temp dir");
        let script = temp.path().join("slow-agent.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").expect("write script");
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script).expect("metadata").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script, perms).expect("chmod");
        }

        let git = Arc::new(ScriptedGit::new(|_| Ok(String::new())));
        let runner = AgentCliRunner::new(git)
            .program(script.to_string_lossy())
            .timeout(Duration::from_millis(100));

        let err = runner
            .run(request(CLAUDE, temp.path()))
            .await
            .expect_err("agent times out");

        assert!(matches!(err, Error::CommandTimeout { .. }));
    }
}
