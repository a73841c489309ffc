//! The [`Event`] record (§3, §6, §11): the single typed record published to
//! the Event Bus.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::agent::AgentId;
use super::task::TaskId;

/// The kind of lifecycle event being reported (§6 Event stream format).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// An Executor admitted a task and began driving its agent.
    TaskStarted,
    /// A task's agent branch was merged and the task reached `completed`.
    TaskCompleted,
    /// A task exhausted its attempts or hit a fatal VCS error.
    TaskFailed,
    /// A task transitioned to `blocked` awaiting a human decision.
    TaskBlocked,
    /// A task escalated and is waiting on the escalation reply channel.
    TaskEscalation,
    /// The Merger began integrating an agent branch.
    MergeStarted,
    /// The Merger committed a clean (or structured/semantic) merge.
    MergeCompleted,
    /// The Merger could not resolve conflicts automatically.
    MergeConflict,
    /// The whole session ended (success or stop-condition).
    SessionDone,
}

/// A single event published to the Event Bus (§3, §6, §11).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event_type: EventType,
    /// The task this event concerns, if any.
    pub task_id: Option<TaskId>,
    /// The agent this event concerns, if any.
    pub agent_id: Option<AgentId>,
    /// Human-readable summary.
    pub message: String,
    /// Error detail, present for failure-shaped events.
    pub error: Option<String>,
    /// Unix epoch milliseconds, stamped by the publisher.
    pub timestamp_ms: u64,
    /// Tokens consumed by the agent run this event concerns, if known.
    pub tokens_used: Option<u64>,
    /// Approximate cost in USD, if known.
    pub cost: Option<f64>,
    /// Duration of the operation this event concerns, if known.
    pub duration: Option<Duration>,
    /// Path to a per-agent transcript log, if one was written.
    pub log_file: Option<String>,
    /// Free-form structured extras, kept small and JSON-serializable.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Construct a minimal event of the given type at `timestamp_ms`, with
    /// every optional field empty. Builder methods below fill in the rest.
    #[must_use]
    pub fn new(event_type: EventType, timestamp_ms: u64, message: impl Into<String>) -> Self {
        Self {
            event_type,
            task_id: None,
            agent_id: None,
            message: message.into(),
            error: None,
            timestamp_ms,
            tokens_used: None,
            cost: None,
            duration: None,
            log_file: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a task id.
    #[must_use]
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Attach an agent id.
    #[must_use]
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Attach an error detail string.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// The headless-consumer line prefix for this event type (§7
    /// User-visible behavior).
    #[must_use]
    pub const fn headless_prefix(&self) -> &'static str {
        match self.event_type {
            EventType::TaskStarted => "[STARTED]",
            EventType::TaskCompleted => "[DONE]",
            EventType::TaskFailed => "[FAILED]",
            EventType::TaskBlocked => "[BLOCKED]",
            EventType::TaskEscalation => "[BLOCKED]",
            EventType::MergeStarted => "[MERGE]",
            EventType::MergeCompleted => "[MERGED]",
            EventType::MergeConflict => "[MERGE]",
            EventType::SessionDone => "[SESSION]",
        }
    }
}
