//! The Decomposer (C3, §4.3): turn a free-form request into a valid [`Dag`].

mod coalesce;
mod raw;
pub mod quality;

use alphie_runner::{AgentRunner, EventKind, RunnerOptions, StreamEvent};

use crate::error::EngineError;
use crate::model::dag::{Dag, DagBuildError};

/// Render the structured prompt instructing an agent to emit a JSON array of
/// task descriptors (§4.3 step 1).
#[must_use]
pub fn render_prompt(request: &str, architecture_spec: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Decompose the following request into a JSON array of tasks. Each task object must have \
         the fields: title, description, task_type (one of SETUP, FEATURE, BUGFIX, REFACTOR), \
         file_boundaries (array of path prefixes), depends_on (array of OTHER TASKS' TITLES, not \
         ids), acceptance_criteria, and verification_intent (array of shell commands). Respond \
         with only the JSON array, nothing else.\n\n",
    );
    if let Some(spec) = architecture_spec {
        prompt.push_str("Architecture specification:\n");
        prompt.push_str(spec);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Request:\n");
    prompt.push_str(request);
    prompt
}

/// Drive an `AgentRunner` to decompose `request` into a checked [`Dag`]
/// (§4.3 steps 1-5: prompt, parse, resolve, cycle-check, coalesce).
///
/// # Errors
/// Returns [`EngineError::MalformedDecomposition`] if the agent's output
/// does not contain a parseable task array, [`EngineError::UnknownDependency`]
/// if a declared dependency title does not resolve, or
/// [`EngineError::CircularDependency`] if the result is cyclic.
pub fn decompose(
    runner: &mut AgentRunner,
    request: &str,
    architecture_spec: Option<&str>,
    options: RunnerOptions,
) -> Result<Dag, EngineError> {
    let prompt = render_prompt(request, architecture_spec);
    runner
        .start(&prompt, options)
        .map_err(|e| EngineError::AgentFailed {
            task: crate::model::task::TaskId::new(),
            detail: e.to_string(),
        })?;
    let events = runner.events().map_err(|e| EngineError::AgentFailed {
        task: crate::model::task::TaskId::new(),
        detail: e.to_string(),
    })?;
    runner.wait().map_err(|e| EngineError::AgentFailed {
        task: crate::model::task::TaskId::new(),
        detail: e.to_string(),
    })?;

    let final_text = final_result_text(&events).ok_or_else(|| EngineError::MalformedDecomposition {
        detail: "agent produced no result text".to_owned(),
    })?;

    let raw_tasks = raw::extract_and_parse(&final_text).map_err(|detail| {
        EngineError::MalformedDecomposition { detail }
    })?;

    let tasks = raw::resolve(raw_tasks)?;
    let dag = Dag::try_new(tasks).map_err(map_dag_error)?;
    let coalesced = coalesce::coalesce_setup_tasks(dag);
    Dag::try_new(coalesced.into_tasks()).map_err(map_dag_error)
}

fn final_result_text(events: &[StreamEvent]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Result)
        .or_else(|| events.iter().rev().find(|e| e.kind == EventKind::Assistant))
        .and_then(|e| e.text.clone())
}

fn map_dag_error(err: DagBuildError) -> EngineError {
    match err {
        DagBuildError::Cycle(cycle) => EngineError::CircularDependency { cycle: cycle.titles },
        DagBuildError::UnknownDependency(dep) => EngineError::UnknownDependency {
            task: dep.task_title,
            depends_on: dep.missing_id.to_string(),
        },
    }
}
