//! Parsing the Decomposer agent's JSON output into [`Task`]s (§4.3 steps 2-3).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::EngineError;
use crate::model::task::{Task, TaskId, TaskType};

/// One task descriptor as emitted by the decomposer agent. `depends_on`
/// names other tasks by *title*, not id — ids don't exist until this struct
/// is resolved into a [`Task`].
#[derive(Clone, Debug, Deserialize)]
pub(super) struct RawTask {
    pub(super) title: String,
    #[serde(default)]
    pub(super) description: String,
    pub(super) task_type: TaskType,
    #[serde(default)]
    pub(super) file_boundaries: Vec<String>,
    #[serde(default)]
    pub(super) depends_on: Vec<String>,
    #[serde(default)]
    pub(super) acceptance_criteria: String,
    #[serde(default)]
    pub(super) verification_intent: Vec<String>,
}

/// Find the outermost `[ … ]` block in `text` and parse it as a `RawTask`
/// array (§4.3 step 2).
pub(super) fn extract_and_parse(text: &str) -> Result<Vec<RawTask>, String> {
    let start = text.find('[').ok_or_else(|| "no JSON array found in agent output".to_owned())?;
    let end = text
        .rfind(']')
        .ok_or_else(|| "no closing ']' found in agent output".to_owned())?;
    if end < start {
        return Err("malformed JSON array bounds in agent output".to_owned());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| e.to_string())
}

/// Resolve title-based `depends_on` references into [`TaskId`]s and build
/// the final [`Task`] list (§4.3 step 3).
pub(super) fn resolve(raw_tasks: Vec<RawTask>) -> Result<Vec<Task>, EngineError> {
    let mut ids_by_title: HashMap<String, TaskId> = HashMap::with_capacity(raw_tasks.len());
    let mut tasks = Vec::with_capacity(raw_tasks.len());

    for raw in &raw_tasks {
        let mut task = Task::new(raw.title.clone(), raw.task_type);
        task.description = raw.description.clone();
        task.file_boundaries = raw.file_boundaries.clone();
        task.acceptance_criteria = raw.acceptance_criteria.clone();
        task.verification_intent = raw.verification_intent.clone();
        ids_by_title.insert(raw.title.clone(), task.id.clone());
        tasks.push(task);
    }

    for (raw, task) in raw_tasks.iter().zip(tasks.iter_mut()) {
        for dep_title in &raw.depends_on {
            let dep_id = ids_by_title.get(dep_title).ok_or_else(|| EngineError::UnknownDependency {
                task: raw.title.clone(),
                depends_on: dep_title.clone(),
            })?;
            task.depends_on.push(dep_id.clone());
        }
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_and_parse_strips_surrounding_prose() {
        let text = "Here you go:\n[{\"title\": \"a\", \"task_type\": \"FEATURE\"}]\nThanks!";
        let tasks = extract_and_parse(text).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "a");
    }

    #[test]
    fn extract_and_parse_no_brackets_errors() {
        assert!(extract_and_parse("no json here").is_err());
    }

    #[test]
    fn resolve_maps_titles_to_ids() {
        let raws = vec![
            RawTask {
                title: "a".to_owned(),
                description: String::new(),
                task_type: TaskType::Setup,
                file_boundaries: vec![],
                depends_on: vec![],
                acceptance_criteria: String::new(),
                verification_intent: vec![],
            },
            RawTask {
                title: "b".to_owned(),
                description: String::new(),
                task_type: TaskType::Feature,
                file_boundaries: vec![],
                depends_on: vec!["a".to_owned()],
                acceptance_criteria: String::new(),
                verification_intent: vec![],
            },
        ];
        let tasks = resolve(raws).unwrap();
        assert_eq!(tasks[1].depends_on, vec![tasks[0].id.clone()]);
    }

    #[test]
    fn resolve_unknown_dependency_errors() {
        let raws = vec![RawTask {
            title: "a".to_owned(),
            description: String::new(),
            task_type: TaskType::Feature,
            file_boundaries: vec![],
            depends_on: vec!["ghost".to_owned()],
            acceptance_criteria: String::new(),
            verification_intent: vec![],
        }];
        let err = resolve(raws).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDependency { .. }));
    }
}
