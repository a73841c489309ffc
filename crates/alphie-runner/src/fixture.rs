//! Test-only `AgentRunner` variant that replays a scripted event sequence.

use crate::{RunnerError, RunnerOptions, StreamEvent};

/// Emits a pre-programmed [`StreamEvent`] sequence, for deterministic tests
/// of the Executor/Validator/Scheduler without spawning anything real.
pub struct FixtureRunner {
    script: Vec<StreamEvent>,
    started: bool,
    killed: bool,
}

impl FixtureRunner {
    /// Build a runner that will replay `script` verbatim on `start`.
    #[must_use]
    pub fn new(script: Vec<StreamEvent>) -> Self {
        Self {
            script,
            started: false,
            killed: false,
        }
    }

    pub(crate) fn start(&mut self, _prompt: &str, _options: RunnerOptions) -> Result<(), RunnerError> {
        if self.started {
            return Err(RunnerError::AlreadyStarted);
        }
        self.started = true;
        Ok(())
    }

    pub(crate) fn events(&mut self) -> Result<Vec<StreamEvent>, RunnerError> {
        if !self.started {
            return Err(RunnerError::NotStarted);
        }
        if self.killed {
            return Ok(Vec::new());
        }
        Ok(self.script.clone())
    }

    pub(crate) fn wait(&mut self) -> Result<(), RunnerError> {
        if !self.started {
            return Err(RunnerError::NotStarted);
        }
        Ok(())
    }

    pub(crate) fn kill(&mut self) {
        self.killed = true;
    }
}
