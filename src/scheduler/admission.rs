//! Admission control (§4.9): which `ready` tasks get admitted this tick,
//! gated by the concurrency cap and file-boundary exclusion, with a fixed
//! tie-break order among equally-admissible tasks.

use crate::model::dag::Dag;
use crate::model::task::{Task, TaskId, TaskStatus, TaskType};

/// One currently in-progress task's declared write boundaries, as tracked
/// by the Scheduler so a newly-ready task can be checked against them
/// (§4.9 rule 2).
#[derive(Clone, Debug)]
pub struct InFlight {
    /// The in-progress task's id.
    pub task_id: TaskId,
    /// The boundaries it was admitted with.
    pub file_boundaries: Vec<String>,
}

fn components(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether `a` and `b` are the same path, or one is a path-component prefix
/// of the other, or a bare single-component boundary matches the other's
/// last component (§4.9 rule 2: "normalized path-component prefix/suffix
/// overlap").
#[must_use]
fn boundaries_conflict(a: &str, b: &str) -> bool {
    let ca = components(a);
    let cb = components(b);
    if ca.is_empty() || cb.is_empty() {
        return false;
    }
    let n = ca.len().min(cb.len());
    if ca[..n] == cb[..n] {
        return true;
    }
    if ca.len() == 1 && ca[0] == *cb.last().expect("non-empty") {
        return true;
    }
    if cb.len() == 1 && cb[0] == *ca.last().expect("non-empty") {
        return true;
    }
    false
}

fn conflicts_with_any(boundaries: &[String], in_play: &[String]) -> bool {
    boundaries
        .iter()
        .any(|b| in_play.iter().any(|ib| boundaries_conflict(b, ib)))
}

/// Order candidates for admission (§4.9 rule 3): SETUP tasks first, then by
/// descending descendant count, then by ascending id for a fully
/// deterministic tie-break.
fn admission_order(dag: &Dag, tasks: &mut [&Task]) {
    tasks.sort_by(|a, b| {
        let setup_a = a.task_type == TaskType::Setup;
        let setup_b = b.task_type == TaskType::Setup;
        setup_b
            .cmp(&setup_a)
            .then_with(|| dag.descendant_count(&b.id).cmp(&dag.descendant_count(&a.id)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Select which `pending`-and-ready tasks to admit this tick (§4.9 rules
/// 1–3): respecting the concurrency cap, excluding any whose boundaries
/// overlap an in-flight task's, and breaking ties deterministically.
#[must_use]
pub fn admit(dag: &Dag, in_flight: &[InFlight], max_agents: u32) -> Vec<TaskId> {
    let slots = (max_agents as usize).saturating_sub(in_flight.len());
    if slots == 0 {
        return Vec::new();
    }

    let mut ready = dag.ready_tasks();
    admission_order(dag, &mut ready);

    let mut in_play: Vec<String> =
        in_flight.iter().flat_map(|f| f.file_boundaries.iter().cloned()).collect();
    let mut admitted = Vec::new();

    for task in ready {
        if admitted.len() >= slots {
            break;
        }
        if conflicts_with_any(&task.file_boundaries, &in_play) {
            continue;
        }
        admitted.push(task.id.clone());
        in_play.extend(task.file_boundaries.iter().cloned());
    }

    admitted
}

/// Transition admitted tasks `pending -> ready` (§3, §4.9).
pub fn mark_ready(dag: &mut Dag, ids: &[TaskId]) {
    for id in ids {
        if let Some(task) = dag.get_mut(id) {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Ready;
            }
        }
    }
}

/// Transition a `ready` task to `in_progress` once an Executor picks it up
/// (§3, §4.9).
pub fn mark_in_progress(dag: &mut Dag, id: &TaskId) {
    if let Some(task) = dag.get_mut(id) {
        if task.status == TaskStatus::Ready {
            task.status = TaskStatus::InProgress;
        }
    }
}

/// Unblock a `blocked` task back to `ready` after a human resolves its
/// escalation with `retry` (§3, §4.9).
pub fn unblock(dag: &mut Dag, id: &TaskId) {
    if let Some(task) = dag.get_mut(id) {
        if task.status == TaskStatus::Blocked {
            task.status = TaskStatus::Ready;
        }
    }
}
