//! The critical-file table shared by the Decomposer's SETUP coalescing
//! (§4.3 step 5) and the Merger's structured-merge pre-pass (§4.8): paths
//! whose concurrent modification is known to cause disproportionate merge
//! conflicts (§6 table).

const CRITICAL_BASENAMES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    ".npmrc",
    "go.mod",
    "go.sum",
    "Cargo.toml",
    "Cargo.lock",
    "pyproject.toml",
    "requirements.txt",
    "setup.py",
    "poetry.lock",
    "Pipfile",
    "Pipfile.lock",
    "Gemfile",
    "Gemfile.lock",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "composer.json",
    "composer.lock",
    "tsconfig.json",
    "jsconfig.json",
    "Makefile",
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    ".gitignore",
    ".gitattributes",
];

const CRITICAL_GLOB_PREFIXES: &[&str] = &[".eslintrc", ".prettierrc", ".env"];
const CRITICAL_GLOB_SUFFIXES: &[&str] = &[".csproj", ".sln"];

/// Lockfiles whose regeneration command is run after a structured merge
/// rather than attempting to merge their contents directly (§4.8).
const LOCKFILE_REGENERATION: &[(&str, &str)] = &[
    ("Cargo.lock", "cargo generate-lockfile"),
    ("package-lock.json", "npm install --package-lock-only"),
    ("yarn.lock", "yarn install --mode update-lockfile"),
    ("pnpm-lock.yaml", "pnpm install --lockfile-only"),
    ("poetry.lock", "poetry lock"),
    ("Pipfile.lock", "pipenv lock"),
    ("Gemfile.lock", "bundle lock"),
    ("composer.lock", "composer update --lock"),
];

/// `path`'s basename, or `path` itself if it has no `/`.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `path`'s basename matches the critical-file table (§6).
#[must_use]
pub fn critical_key(path: &str) -> Option<&'static str> {
    let base = basename(path);
    if let Some(exact) = CRITICAL_BASENAMES.iter().find(|b| **b == base) {
        return Some(exact);
    }
    if let Some(prefix) = CRITICAL_GLOB_PREFIXES.iter().find(|p| base.starts_with(**p)) {
        return Some(prefix);
    }
    if let Some(suffix) = CRITICAL_GLOB_SUFFIXES.iter().find(|s| base.ends_with(**s)) {
        return Some(suffix);
    }
    None
}

/// The regeneration command registered for `path`'s lockfile basename, if
/// any (§4.8: "for lockfiles, skip merge and schedule a regeneration
/// command").
#[must_use]
pub fn lockfile_regeneration_command(path: &str) -> Option<&'static str> {
    let base = basename(path);
    LOCKFILE_REGENERATION
        .iter()
        .find(|(name, _)| *name == base)
        .map(|(_, cmd)| *cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_key_matches_exact_basenames() {
        assert_eq!(critical_key("package.json"), Some("package.json"));
        assert_eq!(critical_key("sub/dir/Cargo.toml"), Some("Cargo.toml"));
        assert_eq!(critical_key("src/main.rs"), None);
    }

    #[test]
    fn critical_key_matches_glob_patterns() {
        assert_eq!(critical_key(".eslintrc.json"), Some(".eslintrc"));
        assert_eq!(critical_key("project.csproj"), Some(".csproj"));
    }

    #[test]
    fn lockfile_regeneration_known_lockfile() {
        assert_eq!(lockfile_regeneration_command("Cargo.lock"), Some("cargo generate-lockfile"));
        assert_eq!(lockfile_regeneration_command("src/Cargo.lock"), Some("cargo generate-lockfile"));
    }

    #[test]
    fn lockfile_regeneration_non_lockfile_is_none() {
        assert_eq!(lockfile_regeneration_command("Cargo.toml"), None);
    }
}
