//! Ecosystem auto-detection for the build/test layer (§4.7): "detected
//! per-ecosystem commands, analogous across ecosystems."

use std::path::Path;

/// The canonical build/test/lint/typecheck commands for one ecosystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct Ecosystem {
    pub(super) build_command: &'static str,
    pub(super) test_command: &'static str,
    pub(super) lint_command: Option<&'static str>,
    pub(super) typecheck_command: Option<&'static str>,
}

const MANIFESTS: &[(&str, Ecosystem)] = &[
    (
        "Cargo.toml",
        Ecosystem {
            build_command: "cargo build",
            test_command: "cargo test",
            lint_command: Some("cargo clippy --all-targets"),
            typecheck_command: None,
        },
    ),
    (
        "package.json",
        Ecosystem {
            build_command: "npm run build --if-present",
            test_command: "npm test --if-present",
            lint_command: Some("npm run lint --if-present"),
            typecheck_command: Some("npm run typecheck --if-present"),
        },
    ),
    (
        "go.mod",
        Ecosystem {
            build_command: "go build ./...",
            test_command: "go test ./...",
            lint_command: Some("go vet ./..."),
            typecheck_command: None,
        },
    ),
    (
        "pyproject.toml",
        Ecosystem {
            build_command: "python -m py_compile $(git ls-files '*.py')",
            test_command: "pytest",
            lint_command: Some("ruff check ."),
            typecheck_command: Some("mypy ."),
        },
    ),
];

/// Detect the project's ecosystem by manifest presence at the worktree root
/// (§4.7: "Auto-detect project type by lockfile/manifest presence").
#[must_use]
pub(super) fn detect(workdir: &Path) -> Option<Ecosystem> {
    MANIFESTS
        .iter()
        .find(|(manifest, _)| workdir.join(manifest).exists())
        .map(|(_, eco)| *eco)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cargo_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        let eco = detect(dir.path()).unwrap();
        assert_eq!(eco.build_command, "cargo build");
    }

    #[test]
    fn no_manifest_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect(dir.path()).is_none());
    }

    #[test]
    fn first_matching_manifest_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join("go.mod"), "module x").unwrap();
        let eco = detect(dir.path()).unwrap();
        assert_eq!(eco.build_command, "cargo build");
    }
}
