//! Command presets for common project types.
//!
//! A preset fills every pipeline phase with the usual commands for one
//! tech stack. Format commands rewrite files in place, so the agent's diff
//! already carries the formatting when lint and test run.

use std::path::Path;

/// Available preset names.
pub mod names {
    /// Python projects (ruff, mypy, pytest).
    pub const PYTHON: &str = "python";
    /// Node.js/TypeScript projects (prettier, eslint, tsc, npm test).
    pub const NODE: &str = "node";
    /// Rust projects (cargo fmt, clippy, cargo test).
    pub const RUST: &str = "rust";
    /// Go projects (gofmt, go vet, go test).
    pub const GO: &str = "go";
}

/// Pipeline commands for one project type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    /// Preset name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Format phase commands.
    pub format: &'static [&'static str],
    /// Lint phase commands.
    pub lint: &'static [&'static str],
    /// Test phase commands.
    pub test: &'static [&'static str],
    /// Pre-commit phase commands.
    pub pre_commit: &'static [&'static str],
}

const PRE_COMMIT_ALL: &[&str] = &["pre-commit run --all-files"];

const PRESETS: &[Preset] = &[
    Preset {
        name: names::PYTHON,
        description: "Python projects (ruff, mypy, pytest)",
        format: &["ruff format ."],
        lint: &["ruff check .", "mypy ."],
        test: &["pytest -x -q"],
        pre_commit: PRE_COMMIT_ALL,
    },
    Preset {
        name: names::NODE,
        description: "Node.js/TypeScript projects (prettier, eslint, tsc, npm test)",
        format: &["npx prettier --write ."],
        lint: &["npx eslint .", "npx tsc --noEmit"],
        test: &["npm test"],
        pre_commit: PRE_COMMIT_ALL,
    },
    Preset {
        name: names::RUST,
        description: "Rust projects (cargo fmt, clippy, cargo test)",
        format: &["cargo fmt --all"],
        lint: &["cargo clippy --all-targets -- -D warnings"],
        test: &["cargo test"],
        pre_commit: PRE_COMMIT_ALL,
    },
    Preset {
        name: names::GO,
        description: "Go projects (gofmt, go vet, go test)",
        format: &["gofmt -w ."],
        lint: &["go vet ./..."],
        test: &["go test ./..."],
        pre_commit: PRE_COMMIT_ALL,
    },
];

/// Returns a list of available preset names.
#[must_use]
pub const fn available() -> &'static [&'static str] {
    &[names::PYTHON, names::NODE, names::RUST, names::GO]
}

/// Looks up a preset, accepting a few common aliases.
#[must_use]
pub fn get(name: &str) -> Option<&'static Preset> {
    let name = match name {
        "nodejs" | "typescript" | "ts" => names::NODE,
        "golang" => names::GO,
        other => other,
    };
    PRESETS.iter().find(|p| p.name == name)
}

/// Returns true if the preset name is valid.
#[must_use]
pub fn is_valid(name: &str) -> bool {
    get(name).is_some()
}

/// Marker files identifying each preset's project type, in priority order.
const MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", names::RUST),
    ("go.mod", names::GO),
    ("pyproject.toml", names::PYTHON),
    ("setup.py", names::PYTHON),
    ("package.json", names::NODE),
];

/// Guesses the preset for a project from its marker files.
#[must_use]
pub fn detect(dir: &Path) -> Option<&'static Preset> {
    MARKERS
        .iter()
        .find(|(marker, _)| dir.join(marker).is_file())
        .and_then(|(_, name)| get(name))
}

/// Returns a description for a preset.
#[must_use]
pub fn description(name: &str) -> &'static str {
    get(name).map_or("Unknown preset", |p| p.description)
}
