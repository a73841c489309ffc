//! Unified error taxonomy for the engine.
//!
//! Defines [`EngineError`], the categorized error type returned across the
//! engine's public surface. Each variant is self-contained: a caller should be
//! able to understand what happened and what to do next without additional
//! context. No component-level abstraction (a particular VCS binary, a
//! particular agent transport) leaks into this type — it speaks only in terms
//! of tasks, agents, merges, and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::task::TaskId;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The decomposer produced a cyclic dependency graph.
    #[error(
        "circular dependency detected: {cycle:?}\n  To fix: break the cycle in the decomposition request, or split one of the tasks."
    )]
    CircularDependency {
        /// The cycle, as a sequence of task titles, e.g. `["A", "B", "A"]`.
        cycle: Vec<String>,
    },
    /// A task declared a dependency on a title that does not resolve to any
    /// other task in the decomposition.
    #[error(
        "task '{task}' depends on unknown task '{depends_on}'.\n  To fix: check the decomposer's task titles match exactly."
    )]
    UnknownDependency {
        /// The task that declared the bad dependency.
        task: String,
        /// The dependency title that could not be resolved.
        depends_on: String,
    },
    /// The decomposer's agent did not return parseable task JSON.
    #[error(
        "could not parse decomposition output: {detail}\n  To fix: inspect the agent's raw response for a malformed JSON array."
    )]
    MalformedDecomposition {
        /// Parser diagnostic.
        detail: String,
    },
    /// An agent run exceeded its attempt budget without passing validation.
    #[error(
        "task '{task}' exhausted {attempts} attempt(s) without passing validation.\n  To fix: respond to the escalation with retry, skip, manual, or abort."
    )]
    MaxAttemptsExceeded {
        /// The task that exhausted its attempts.
        task: TaskId,
        /// Attempts actually made.
        attempts: u32,
    },
    /// An `AgentRunner` reported a terminal failure (timeout, API error, …).
    #[error("agent run for task '{task}' failed: {detail}")]
    AgentFailed {
        /// The task being executed.
        task: TaskId,
        /// Underlying failure description.
        detail: String,
    },
    /// A validator layer rejected a task's output.
    #[error("task '{task}' failed the {layer} validation layer: {critique}")]
    ValidationFailed {
        /// Which layer rejected it.
        layer: &'static str,
        /// The task being validated.
        task: TaskId,
        /// Critique text fed back to the executor.
        critique: String,
    },
    /// A merge could not be completed after exhausting the strategy ladder.
    #[error(
        "merge for task '{task}' left these file(s) conflicted: {conflicts:?}\n  To fix: resolve the escalation with accept_session, accept_agent, manual, skip_agent, or abort_session."
    )]
    MergeConflict {
        /// The task whose branch failed to merge.
        task: TaskId,
        /// Files still conflicted after structured and semantic merge.
        conflicts: Vec<String>,
    },
    /// The VCS adapter reported a fatal error for the current task.
    #[error("vcs operation '{operation}' failed: {detail}\n  To fix: inspect repository state and retry.")]
    VcsError {
        /// The VCS operation that failed (e.g. `"worktree add"`).
        operation: String,
        /// Underlying adapter diagnostic.
        detail: String,
    },
    /// A configuration file could not be loaded or parsed.
    #[error("configuration error in {path:?}: {detail}\n  To fix: edit the config file and correct the issue.")]
    ConfigError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },
    /// The session was canceled; not a failure, but surfaced through the same
    /// channel so callers can match on it alongside real errors.
    #[error("session canceled")]
    Canceled,
    /// An I/O error occurred during an engine operation.
    #[error("I/O error: {0}\n  To fix: check file permissions and disk space.")]
    Io(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<crate::config::ConfigError> for EngineError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::ConfigError {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

impl From<alphie_vcs::VcsError> for EngineError {
    fn from(err: alphie_vcs::VcsError) -> Self {
        Self::VcsError {
            operation: err.operation().to_owned(),
            detail: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tid() -> TaskId {
        TaskId::new()
    }

    #[test]
    fn display_circular_dependency() {
        let err = EngineError::CircularDependency {
            cycle: vec!["A".to_owned(), "B".to_owned(), "A".to_owned()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("\"A\""));
        assert!(msg.contains("\"B\""));
        assert!(msg.contains("break the cycle"));
    }

    #[test]
    fn display_unknown_dependency() {
        let err = EngineError::UnknownDependency {
            task: "build-api".to_owned(),
            depends_on: "setup-db".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("build-api"));
        assert!(msg.contains("setup-db"));
    }

    #[test]
    fn display_max_attempts_exceeded() {
        let id = tid();
        let err = EngineError::MaxAttemptsExceeded {
            task: id.clone(),
            attempts: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("3 attempt"));
    }

    #[test]
    fn display_merge_conflict_multiple() {
        let err = EngineError::MergeConflict {
            task: tid(),
            conflicts: vec!["a.rs".to_owned(), "b.rs".to_owned()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("a.rs"));
        assert!(msg.contains("b.rs"));
    }

    #[test]
    fn display_config_error() {
        let err = EngineError::ConfigError {
            path: PathBuf::from(".alphie.yaml"),
            detail: "unknown field 'foo'".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains(".alphie.yaml"));
        assert!(msg.contains("unknown field 'foo'"));
    }

    #[test]
    fn display_io_error() {
        let err = EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(format!("{err}").contains("permission denied"));
    }

    #[test]
    fn error_source_io() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = EngineError::Io(inner);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_io_is_none() {
        let err = EngineError::Canceled;
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn from_config_error() {
        let cfg_err = crate::config::ConfigError {
            path: Some(PathBuf::from("/repo/.alphie.yaml")),
            message: "bad syntax".to_owned(),
        };
        let err: EngineError = cfg_err.into();
        match err {
            EngineError::ConfigError { path, detail } => {
                assert_eq!(path, PathBuf::from("/repo/.alphie.yaml"));
                assert_eq!(detail, "bad syntax");
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}
