//! The [`Agent`] record (§3): one running instance of an `AgentRunner`
//! bound to a single [`Task`](super::task::Task).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskId;

/// Stable opaque identity for an [`Agent`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Mint a fresh, unique agent id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(value))
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// The lifecycle of a single Agent within its Executor (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    /// Worktree allocated, `AgentRunner::start` not yet called.
    Spawning,
    /// Streaming events from the `AgentRunner`.
    Running,
    /// The runner terminated; the Multi-Layer Validator is running.
    Validating,
    /// Validation passed; the Merger is integrating the branch.
    Merging,
    /// Terminal: merged successfully.
    Done,
    /// Terminal: failed, escalated-and-skipped, or canceled.
    Failed,
}

impl AgentLifecycle {
    /// Whether this lifecycle state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Cumulative token/cost usage for one Agent (§4.2 Token tracker).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounters {
    /// Input tokens consumed so far.
    pub input_tokens: u64,
    /// Output tokens produced so far.
    pub output_tokens: u64,
    /// Approximate cost in USD, derived from the pricing table.
    pub cost_usd: f64,
}

impl UsageCounters {
    /// Add another usage sample (e.g. from one `StreamEvent`).
    pub fn add(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost_usd += cost_usd;
    }
}

/// A running (or finished) instance of an `AgentRunner` bound to one task.
///
/// Owned exclusively by its Executor; destroyed when that Executor returns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable opaque identity.
    pub id: AgentId,
    /// The task this agent is executing.
    pub task_id: TaskId,
    /// Isolated working directory (a [`Worktree`](super::worktree::Worktree) path).
    pub workdir: PathBuf,
    /// The branch the agent commits to.
    pub branch: String,
    /// Cumulative usage.
    pub usage: UsageCounters,
    /// Current lifecycle state.
    pub lifecycle: AgentLifecycle,
}

impl Agent {
    /// Construct a new agent in the `spawning` state.
    #[must_use]
    pub fn new(task_id: TaskId, workdir: PathBuf, branch: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            task_id,
            workdir,
            branch: branch.into(),
            usage: UsageCounters::default(),
            lifecycle: AgentLifecycle::Spawning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_starts_spawning() {
        let a = Agent::new(TaskId::new(), PathBuf::from("/tmp/ws"), "agent-1");
        assert_eq!(a.lifecycle, AgentLifecycle::Spawning);
        assert_eq!(a.usage.input_tokens, 0);
    }

    #[test]
    fn usage_counters_accumulate() {
        let mut u = UsageCounters::default();
        u.add(100, 50, 0.01);
        u.add(200, 75, 0.02);
        assert_eq!(u.input_tokens, 300);
        assert_eq!(u.output_tokens, 125);
        assert!((u.cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn terminal_lifecycles() {
        assert!(AgentLifecycle::Done.is_terminal());
        assert!(AgentLifecycle::Failed.is_terminal());
        assert!(!AgentLifecycle::Running.is_terminal());
    }

    #[test]
    fn agent_id_serde_roundtrip() {
        let id = AgentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
