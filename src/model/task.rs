//! The [`Task`] record (§3) and its identity, type, and status types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Stable opaque identity for a [`Task`].
///
/// Created once by the Decomposer and never reused. Serializes as a plain
/// string so it can round-trip through the decomposition JSON and the event
/// stream without callers needing to know it is backed by a UUID.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Mint a fresh, unique task id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(value))
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// TaskType / TaskStatus
// ---------------------------------------------------------------------------

/// The kind of work a task represents (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    /// Shared scaffolding work (manifests, lockfiles, project config).
    Setup,
    /// New user-visible functionality.
    Feature,
    /// A defect correction.
    Bugfix,
    /// Internal restructuring with no behavior change.
    Refactor,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "SETUP"),
            Self::Feature => write!(f, "FEATURE"),
            Self::Bugfix => write!(f, "BUGFIX"),
            Self::Refactor => write!(f, "REFACTOR"),
        }
    }
}

/// The lifecycle state of a task (§3, §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, dependencies not yet all complete.
    Pending,
    /// Dependencies complete, eligible for admission.
    Ready,
    /// Admitted; an Executor currently owns it.
    InProgress,
    /// Escalated and awaiting a human unblock decision.
    Blocked,
    /// Terminal: merged and done.
    Completed,
    /// Terminal: exhausted attempts or a VCS error, no further retries.
    Failed,
    /// Terminal: session ended before this task ran.
    Canceled,
}

impl TaskStatus {
    /// Terminal statuses never transition further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A single unit of decomposed work (§3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable opaque identity.
    pub id: TaskId,
    /// Short human title, also used by the Decomposer to resolve
    /// textual `depends_on` references before ids are assigned.
    pub title: String,
    /// Longer natural-language description given to the agent.
    pub description: String,
    /// What kind of work this is.
    pub task_type: TaskType,
    /// Path prefixes this task is declared to write. Used by the Scheduler's
    /// file-boundary exclusion rule (§4.9) and the Decomposer's SETUP
    /// coalescing (§4.3).
    pub file_boundaries: Vec<String>,
    /// Ids of tasks that must reach `completed` before this one is ready.
    pub depends_on: Vec<TaskId>,
    /// Natural-language acceptance criteria, given to the acceptance
    /// validation layer.
    pub acceptance_criteria: String,
    /// Commands/conditions that prove completion, run by the contract
    /// validation layer.
    pub verification_intent: Vec<String>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Number of Executor attempts made so far.
    pub attempt_count: u32,
    /// The agent currently (or most recently) assigned to this task.
    pub agent_id: Option<super::agent::AgentId>,
}

impl Task {
    /// Construct a new, `pending` task with a fresh id.
    #[must_use]
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: String::new(),
            task_type,
            file_boundaries: Vec::new(),
            depends_on: Vec::new(),
            acceptance_criteria: String::new(),
            verification_intent: Vec::new(),
            status: TaskStatus::Pending,
            attempt_count: 0,
            agent_id: None,
        }
    }

    /// Whether every dependency id in `completed` would satisfy this task's
    /// `depends_on` set.
    #[must_use]
    pub fn deps_satisfied_by(&self, completed: &std::collections::HashSet<TaskId>) -> bool {
        self.depends_on.iter().all(|d| completed.contains(d))
    }
}
