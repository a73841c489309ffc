//! Tiers: preset bundles of scheduling and model parameters (§4.9, GLOSSARY).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TimeoutsConfig;

/// A preset bundle of scheduling and model parameters.
///
/// `Quick` bypasses decomposition and the scheduler entirely: single-agent
/// inline execution on the current branch (§4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Single-agent, no decomposition, no worktree isolation.
    Quick,
    /// Small, well-scoped request: light decomposition, low concurrency.
    Scout,
    /// Default multi-task tier.
    Builder,
    /// Whole-spec implementation session (drives the Architect Loop).
    Architect,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quick => "quick",
            Self::Scout => "scout",
            Self::Builder => "builder",
            Self::Architect => "architect",
        };
        write!(f, "{s}")
    }
}

/// The resolved `{max_agents, model_name, max_attempts, timeout,
/// quality_threshold}` bundle a tier supplies (§4.9).
#[derive(Clone, Debug, PartialEq)]
pub struct TierParams {
    /// Concurrency cap passed to the Scheduler's admission rule 1.
    pub max_agents: u32,
    /// Model name passed to the `AgentRunner`.
    pub model_name: String,
    /// Critique-retry loop bound (§4.5 step 4).
    pub max_attempts: u32,
    /// Per-task timeout.
    pub timeout: Duration,
    /// Minimum quality score (§4.4) a task must clear before it counts as
    /// passed rather than escalated.
    pub quality_threshold: f64,
}

impl Tier {
    /// Resolve this tier's parameter bundle, using `timeouts` for the
    /// per-tier timeout and `model` as the model name for every tier except
    /// `Architect`, which always runs the strongest available model.
    #[must_use]
    pub fn params(self, model: &str, timeouts: &TimeoutsConfig) -> TierParams {
        let timeout = timeouts.for_tier(self);
        match self {
            Self::Quick => TierParams {
                max_agents: 1,
                model_name: model.to_owned(),
                max_attempts: 1,
                timeout,
                quality_threshold: 0.6,
            },
            Self::Scout => TierParams {
                max_agents: 2,
                model_name: model.to_owned(),
                max_attempts: 2,
                timeout,
                quality_threshold: 0.7,
            },
            Self::Builder => TierParams {
                max_agents: 4,
                model_name: model.to_owned(),
                max_attempts: 3,
                timeout,
                quality_threshold: 0.75,
            },
            Self::Architect => TierParams {
                max_agents: 6,
                model_name: "claude-opus".to_owned(),
                max_attempts: 3,
                timeout,
                quality_threshold: 0.85,
            },
        }
    }

    /// Classify a free-text request into a tier by keyword signal (§4.9).
    ///
    /// Checked from most to least specific: `architect` wins over `builder`
    /// over `scout`, so a request naming several signals takes the largest
    /// scope. Falls back to `None` (caller should use `defaults.tier` or
    /// `Builder`) when no keyword matches.
    #[must_use]
    pub fn classify(request: &str) -> Option<Self> {
        let lower = request.to_lowercase();
        const ARCHITECT_WORDS: &[&str] = &[
            "implement the spec",
            "implement spec",
            "whole spec",
            "entire spec",
            "full implementation",
            "rewrite the app",
        ];
        const BUILDER_WORDS: &[&str] = &["feature", "add support for", "build", "implement"];
        const SCOUT_WORDS: &[&str] = &["investigate", "look into", "explore", "research"];
        const QUICK_WORDS: &[&str] = &["fix typo", "rename", "bump version", "quick fix", "tweak"];

        if ARCHITECT_WORDS.iter().any(|w| lower.contains(w)) {
            Some(Self::Architect)
        } else if BUILDER_WORDS.iter().any(|w| lower.contains(w)) {
            Some(Self::Builder)
        } else if SCOUT_WORDS.iter().any(|w| lower.contains(w)) {
            Some(Self::Scout)
        } else if QUICK_WORDS.iter().any(|w| lower.contains(w)) {
            Some(Self::Quick)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_kebab_names() {
        assert_eq!(Tier::Quick.to_string(), "quick");
        assert_eq!(Tier::Architect.to_string(), "architect");
    }

    #[test]
    fn quick_params_single_agent_single_attempt() {
        let timeouts = TimeoutsConfig::default();
        let params = Tier::Quick.params("claude-sonnet", &timeouts);
        assert_eq!(params.max_agents, 1);
        assert_eq!(params.max_attempts, 1);
    }

    #[test]
    fn architect_always_uses_opus() {
        let timeouts = TimeoutsConfig::default();
        let params = Tier::Architect.params("claude-haiku", &timeouts);
        assert_eq!(params.model_name, "claude-opus");
    }

    #[test]
    fn timeout_comes_from_config() {
        let mut timeouts = TimeoutsConfig::default();
        timeouts.builder_seconds = 42;
        let params = Tier::Builder.params("claude-sonnet", &timeouts);
        assert_eq!(params.timeout, Duration::from_secs(42));
    }

    #[test]
    fn classify_architect_beats_builder() {
        let tier = Tier::classify("please implement the spec end to end, add support for auth");
        assert_eq!(tier, Some(Tier::Architect));
    }

    #[test]
    fn classify_builder_keyword() {
        assert_eq!(Tier::classify("add a new feature for dark mode"), Some(Tier::Builder));
    }

    #[test]
    fn classify_scout_keyword() {
        assert_eq!(Tier::classify("investigate why login is slow"), Some(Tier::Scout));
    }

    #[test]
    fn classify_quick_keyword() {
        assert_eq!(Tier::classify("quick fix: rename this variable"), Some(Tier::Quick));
    }

    #[test]
    fn classify_no_match_returns_none() {
        assert_eq!(Tier::classify("hello"), None);
    }
}
