//! The Quality Scorer and Static Validator (C4, §4.4): pure functions over a
//! task list, no I/O beyond reading the target repo's file tree.

use std::path::Path;

use crate::model::task::{Task, TaskType};

const VAGUE_BOUNDARIES: &[&str] = &[".", "src/", "src", "./", "lib/", "lib"];

const OVERLAP_PENALTY: f64 = 0.15;
const OVERLAP_PENALTY_CAP: f64 = 0.5;
const DEPTH_PENALTY_PER_LEVEL: f64 = 0.1;
const MAX_UNPENALIZED_DEPTH: u32 = 3;
const MISSING_ACCEPTANCE_PENALTY: f64 = 0.2;
const MISSING_VERIFICATION_PENALTY: f64 = 0.3;
const VAGUE_BOUNDARY_PENALTY: f64 = 0.15;
const ROOT_BOUNDARY_PENALTY: f64 = 0.1;

const MANY_TASKS_THRESHOLD: usize = 10;
const MANY_TASKS_PENALTY_PER_TASK: f64 = 0.05;
const MANY_TASKS_PENALTY_CAP: f64 = 0.3;
const LOW_PARALLELISM_TASK_THRESHOLD: usize = 3;
const LOW_PARALLELISM_PENALTY: f64 = 0.2;

/// A decomposition's overall quality score plus per-task breakdown (§4.4).
#[derive(Clone, Debug, PartialEq)]
pub struct QualityScore {
    /// Mean per-task score after global penalties, clamped to `[0.0, 1.0]`.
    pub overall: f64,
    /// One score per task, in the same order as the input slice.
    pub per_task: Vec<f64>,
}

/// Score a decomposition (§4.4 Score).
#[must_use]
pub fn score(tasks: &[Task]) -> QualityScore {
    let per_task: Vec<f64> = tasks.iter().map(|t| score_task(t, tasks)).collect();
    let mean = if per_task.is_empty() {
        1.0
    } else {
        per_task.iter().sum::<f64>() / per_task.len() as f64
    };

    let mut global_penalty = 0.0;
    if tasks.len() > MANY_TASKS_THRESHOLD {
        let extra = (tasks.len() - MANY_TASKS_THRESHOLD) as f64;
        global_penalty += (extra * MANY_TASKS_PENALTY_PER_TASK).min(MANY_TASKS_PENALTY_CAP);
    }
    let max_parallel = max_ready_width(tasks);
    if max_parallel <= 1 && tasks.len() > LOW_PARALLELISM_TASK_THRESHOLD {
        global_penalty += LOW_PARALLELISM_PENALTY;
    }

    QualityScore {
        overall: (mean - global_penalty).clamp(0.0, 1.0),
        per_task,
    }
}

fn score_task(task: &Task, all: &[Task]) -> f64 {
    let mut s = 1.0;

    for boundary in &task.file_boundaries {
        if VAGUE_BOUNDARIES.contains(&boundary.as_str()) {
            s -= VAGUE_BOUNDARY_PENALTY;
        } else if !boundary.contains('/') && task.task_type != TaskType::Setup {
            s -= ROOT_BOUNDARY_PENALTY;
        }
    }

    let overlaps = all
        .iter()
        .filter(|other| other.id != task.id && boundaries_overlap(task, other))
        .count();
    s -= (overlaps as f64 * OVERLAP_PENALTY).min(OVERLAP_PENALTY_CAP);

    let depth = dependency_depth(task, all);
    if depth > MAX_UNPENALIZED_DEPTH {
        s -= f64::from(depth - MAX_UNPENALIZED_DEPTH) * DEPTH_PENALTY_PER_LEVEL;
    }

    if task.acceptance_criteria.trim().is_empty() {
        s -= MISSING_ACCEPTANCE_PENALTY;
    }
    if task.verification_intent.is_empty() {
        s -= MISSING_VERIFICATION_PENALTY;
    }

    s.clamp(0.0, 1.0)
}

fn boundaries_overlap(a: &Task, b: &Task) -> bool {
    a.file_boundaries
        .iter()
        .any(|ba| b.file_boundaries.iter().any(|bb| ba == bb))
}

fn dependency_depth(task: &Task, all: &[Task]) -> u32 {
    fn depth_of<'a>(id: &crate::model::task::TaskId, all: &'a [Task], seen: &mut Vec<&'a crate::model::task::TaskId>) -> u32 {
        if seen.contains(&id) {
            return 0; // guard against (invalid) cycles; Dag rejects these before scoring anyway
        }
        seen.push(id);
        let Some(t) = all.iter().find(|t| &t.id == id) else {
            return 0;
        };
        t.depends_on
            .iter()
            .map(|d| 1 + depth_of(d, all, seen))
            .max()
            .unwrap_or(0)
    }
    let mut seen = Vec::new();
    depth_of(&task.id, all, &mut seen)
}

fn max_ready_width(tasks: &[Task]) -> usize {
    // Approximate "parallelism": the number of tasks with no dependencies,
    // i.e. the widest the ready set could ever be at session start.
    tasks.iter().filter(|t| t.depends_on.is_empty()).count()
}

/// One warning emitted by [`validate`].
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationWarning {
    /// Human-readable description.
    pub message: String,
}

/// The result of validating a decomposition against a concrete repo (§4.4
/// Validate).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    /// Non-fatal warnings: missing boundary paths, anti-patterns.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(ValidationWarning { message: message.into() });
    }
}

/// Validate a decomposition against `repo_root` on disk (§4.4 Validate).
///
/// Dependency-id resolution and cycle-freedom are enforced earlier by
/// [`crate::model::dag::Dag::try_new`]; this function covers everything
/// that needs the filesystem or is a whole-decomposition shape check.
#[must_use]
pub fn validate(tasks: &[Task], repo_root: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    for task in tasks {
        for boundary in &task.file_boundaries {
            if VAGUE_BOUNDARIES.contains(&boundary.as_str()) {
                continue; // already flagged by the scorer; not a filesystem question
            }
            let candidate = repo_root.join(boundary);
            if candidate.exists() {
                continue;
            }
            let suggestion = nearest_existing_path(repo_root, boundary);
            match suggestion {
                Some(s) => report.warn(format!(
                    "task '{}': boundary '{boundary}' does not exist on disk; did you mean '{s}'?",
                    task.title
                )),
                None => report.warn(format!(
                    "task '{}': boundary '{boundary}' does not exist on disk",
                    task.title
                )),
            }
        }
    }

    let setup_count = tasks.iter().filter(|t| t.task_type == TaskType::Setup).count();
    if !tasks.is_empty() && setup_count as f64 / tasks.len() as f64 > 0.3 {
        report.warn(format!(
            "{setup_count}/{} tasks are SETUP (>30%); consider coalescing further",
            tasks.len()
        ));
    }

    if tasks.len() > 2 && is_chain_shaped(tasks) {
        report.warn("decomposition is a single linear chain; no parallelism is possible".to_owned());
    }

    let overlap_pairs = count_overlap_pairs(tasks);
    if overlap_pairs > tasks.len() {
        report.warn(format!(
            "{overlap_pairs} file-boundary overlap pairs across {} tasks; boundaries may be too coarse",
            tasks.len()
        ));
    }

    report
}

fn is_chain_shaped(tasks: &[Task]) -> bool {
    tasks.iter().all(|t| t.depends_on.len() <= 1)
        && tasks
            .iter()
            .all(|t| tasks.iter().filter(|other| other.depends_on.contains(&t.id)).count() <= 1)
}

fn count_overlap_pairs(tasks: &[Task]) -> usize {
    let mut count = 0;
    for (i, a) in tasks.iter().enumerate() {
        for b in &tasks[i + 1..] {
            if boundaries_overlap(a, b) {
                count += 1;
            }
        }
    }
    count
}

/// Find the existing file under `repo_root` whose relative path is most
/// similar to `candidate`, when similarity is at least 50%.
fn nearest_existing_path(repo_root: &Path, candidate: &str) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    visit_files(repo_root, &mut |rel| {
        let sim = similarity(candidate, &rel);
        if sim >= 0.5 && best.as_ref().is_none_or(|(_, b)| sim > *b) {
            best = Some((rel, sim));
        }
    });
    best.map(|(path, _)| path)
}

fn visit_files(root: &Path, f: &mut impl FnMut(String)) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == ".git" || c.as_os_str() == "target") {
            continue;
        }
        if path.is_dir() {
            visit_files(&path, f);
        } else if let Ok(rel) = path.strip_prefix(root) {
            f(rel.to_string_lossy().into_owned());
        }
    }
}

/// Normalized Levenshtein similarity in `[0.0, 1.0]`.
fn similarity(a: &str, b: &str) -> f64 {
    let dist = levenshtein(a, b) as f64;
    let max_len = a.len().max(b.len()).max(1) as f64;
    1.0 - dist / max_len
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Task;

    fn well_formed_task(title: &str) -> Task {
        let mut t = Task::new(title, TaskType::Feature);
        t.file_boundaries = vec![format!("src/{title}.rs")];
        t.acceptance_criteria = "it works".to_owned();
        t.verification_intent = vec!["cargo test".to_owned()];
        t
    }

    #[test]
    fn well_formed_single_task_scores_near_one() {
        let t = well_formed_task("a");
        let result = score(std::slice::from_ref(&t));
        assert!(result.overall > 0.9, "expected high score, got {}", result.overall);
    }

    #[test]
    fn missing_acceptance_and_verification_penalized() {
        let mut t = Task::new("a", TaskType::Feature);
        t.file_boundaries = vec!["src/a.rs".to_owned()];
        let result = score(std::slice::from_ref(&t));
        assert!(result.per_task[0] < 0.6);
    }

    #[test]
    fn vague_boundary_penalized() {
        let mut t = well_formed_task("a");
        t.file_boundaries = vec![".".to_owned()];
        let result = score(std::slice::from_ref(&t));
        assert!(result.per_task[0] < 1.0);
    }

    #[test]
    fn overlapping_boundaries_penalized() {
        let mut a = well_formed_task("a");
        let mut b = well_formed_task("b");
        a.file_boundaries = vec!["src/shared.rs".to_owned()];
        b.file_boundaries = vec!["src/shared.rs".to_owned()];
        let result = score(&[a, b]);
        assert!(result.per_task[0] < 1.0);
        assert!(result.per_task[1] < 1.0);
    }

    #[test]
    fn low_parallelism_global_penalty() {
        let mut tasks = Vec::new();
        let mut prev: Option<Task> = None;
        for i in 0..5 {
            let mut t = well_formed_task(&format!("t{i}"));
            if let Some(p) = &prev {
                t.depends_on = vec![p.id.clone()];
            }
            prev = Some(t.clone());
            tasks.push(t);
        }
        let result = score(&tasks);
        let without_chain_penalty = {
            let per_task_mean: f64 = result.per_task.iter().sum::<f64>() / result.per_task.len() as f64;
            per_task_mean
        };
        assert!(result.overall < without_chain_penalty);
    }

    #[test]
    fn validate_warns_on_missing_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = well_formed_task("a");
        t.file_boundaries = vec!["src/does_not_exist.rs".to_owned()];
        let report = validate(std::slice::from_ref(&t), dir.path());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn validate_suggests_nearest_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/feature.rs"), "").unwrap();
        let mut t = well_formed_task("a");
        t.file_boundaries = vec!["src/featur.rs".to_owned()];
        let report = validate(std::slice::from_ref(&t), dir.path());
        assert!(report.warnings.iter().any(|w| w.message.contains("feature.rs")));
    }

    #[test]
    fn validate_flags_chain_shaped_dag() {
        let a = well_formed_task("a");
        let mut b = well_formed_task("b");
        b.depends_on = vec![a.id.clone()];
        let mut c = well_formed_task("c");
        c.depends_on = vec![b.id.clone()];
        let dir = tempfile::tempdir().unwrap();
        let report = validate(&[a, b, c], dir.path());
        assert!(report.warnings.iter().any(|w| w.message.contains("linear chain")));
    }

    #[test]
    fn levenshtein_identical_strings_is_zero() {
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn levenshtein_one_substitution() {
        assert_eq!(levenshtein("abc", "abd"), 1);
    }
}
