//! The [`Dag`]: the set of tasks plus the edge relation induced by
//! `depends_on` (§3, §9).
//!
//! Represented as nodes plus id-indexed edge lists, never as back-pointers
//! between tasks — a reverse index (`dependents_of`) is maintained
//! alongside the forward edges so that readiness updates after a
//! completion are O(k) in the number of direct dependents, not O(n) over
//! the whole graph.

use std::collections::{HashMap, HashSet};

use super::task::{Task, TaskId, TaskStatus};

/// A cycle detected while building a [`Dag`], reported as a sequence of task
/// titles closing back on the first (§4.3 step 4, §8 S1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    /// Titles along the cycle, e.g. `["A", "B", "A"]`.
    pub titles: Vec<String>,
}

/// A `depends_on` reference that does not resolve to any task in the set
/// (§4.3 step 3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownDependency {
    /// Title of the task that declared the bad dependency.
    pub task_title: String,
    /// The id that could not be resolved.
    pub missing_id: TaskId,
}

/// The dependency graph over a set of tasks.
#[derive(Clone, Debug, Default)]
pub struct Dag {
    tasks: HashMap<TaskId, Task>,
    /// `dependents_of[id]` lists tasks that declare `id` in their
    /// `depends_on` — the reverse of the edges stored on each `Task`.
    dependents_of: HashMap<TaskId, Vec<TaskId>>,
    /// Insertion order, preserved for deterministic iteration/tie-breaking.
    order: Vec<TaskId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Dag {
    /// Build a `Dag` from a task list, checking both referential integrity
    /// and acyclicity (§3 invariants).
    ///
    /// # Errors
    /// Returns `Err(Ok(unknown))` style is avoided: callers get a
    /// [`DagBuildError`] naming exactly one problem.
    pub fn try_new(tasks: Vec<Task>) -> Result<Self, DagBuildError> {
        let mut by_id = HashMap::with_capacity(tasks.len());
        let mut order = Vec::with_capacity(tasks.len());
        for t in tasks {
            order.push(t.id.clone());
            by_id.insert(t.id.clone(), t);
        }

        for id in &order {
            let task = &by_id[id];
            for dep in &task.depends_on {
                if !by_id.contains_key(dep) {
                    return Err(DagBuildError::UnknownDependency(UnknownDependency {
                        task_title: task.title.clone(),
                        missing_id: dep.clone(),
                    }));
                }
            }
        }

        if let Some(cycle) = detect_cycle(&by_id, &order) {
            return Err(DagBuildError::Cycle(cycle));
        }

        let mut dependents_of: HashMap<TaskId, Vec<TaskId>> =
            order.iter().map(|id| (id.clone(), Vec::new())).collect();
        for id in &order {
            for dep in &by_id[id].depends_on {
                dependents_of
                    .get_mut(dep)
                    .expect("validated above")
                    .push(id.clone());
            }
        }

        Ok(Self {
            tasks: by_id,
            dependents_of,
            order,
        })
    }

    /// Number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Mutable lookup, used by the Scheduler to apply status transitions.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// All tasks, in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(|id| &self.tasks[id])
    }

    /// Tasks that directly depend on `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &TaskId) -> &[TaskId] {
        self.dependents_of.get(id).map_or(&[], Vec::as_slice)
    }

    /// The set of `completed` task ids.
    #[must_use]
    pub fn completed_ids(&self) -> HashSet<TaskId> {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Tasks that are `pending` with every dependency `completed` (§3, §4.9
    /// Ready set). Does not mutate status — the Scheduler transitions
    /// `pending -> ready` explicitly once it decides to admit.
    #[must_use]
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let completed = self.completed_ids();
        self.tasks()
            .filter(|t| t.status == TaskStatus::Pending && t.deps_satisfied_by(&completed))
            .collect()
    }

    /// Count of all transitive descendants of `id` (used by the Scheduler's
    /// tie-break rule, §4.9.3).
    #[must_use]
    pub fn descendant_count(&self, id: &TaskId) -> usize {
        let mut seen = HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(cur) = stack.pop() {
            for d in self.dependents_of(&cur) {
                if seen.insert(d.clone()) {
                    stack.push(d.clone());
                }
            }
        }
        seen.len()
    }
}

/// Why [`Dag::try_new`] rejected a task list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DagBuildError {
    /// A `depends_on` id did not resolve to any task (§4.3 step 3).
    UnknownDependency(UnknownDependency),
    /// The induced graph has a cycle (§3, §4.3 step 4, §8 invariant 1).
    Cycle(Cycle),
}

fn detect_cycle(by_id: &HashMap<TaskId, Task>, order: &[TaskId]) -> Option<Cycle> {
    let mut color: HashMap<&TaskId, Color> =
        order.iter().map(|id| (id, Color::White)).collect();
    let mut path: Vec<TaskId> = Vec::new();

    for start in order {
        if color[start] == Color::White
            && let Some(cycle) = visit(start, by_id, &mut color, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    id: &'a TaskId,
    by_id: &'a HashMap<TaskId, Task>,
    color: &mut HashMap<&'a TaskId, Color>,
    path: &mut Vec<TaskId>,
) -> Option<Cycle> {
    color.insert(id, Color::Gray);
    path.push(id.clone());

    for dep in &by_id[id].depends_on {
        match color.get(dep).copied() {
            Some(Color::Gray) => {
                let start = path.iter().position(|p| p == dep).unwrap_or(0);
                let mut titles: Vec<String> =
                    path[start..].iter().map(|p| by_id[p].title.clone()).collect();
                titles.push(by_id[dep].title.clone());
                return Some(Cycle { titles });
            }
            Some(Color::Black) => {}
            Some(Color::White) | None => {
                if let Some(c) = visit(dep, by_id, color, path) {
                    return Some(c);
                }
            }
        }
    }

    path.pop();
    color.insert(id, Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskType;

    fn task(title: &str, deps: &[&Task]) -> Task {
        let mut t = Task::new(title, TaskType::Feature);
        t.depends_on = deps.iter().map(|d| d.id.clone()).collect();
        t
    }

    #[test]
    fn acyclic_graph_builds() {
        let a = task("a", &[]);
        let b = task("b", &[&a]);
        let dag = Dag::try_new(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(dag.len(), 2);
        assert_eq!(dag.dependents_of(&a.id), &[b.id.clone()]);
    }

    #[test]
    fn two_cycle_rejected_s1() {
        let mut a = Task::new("A", TaskType::Feature);
        let mut b = Task::new("B", TaskType::Feature);
        a.depends_on = vec![b.id.clone()];
        b.depends_on = vec![a.id.clone()];
        let err = Dag::try_new(vec![a, b]).unwrap_err();
        match err {
            DagBuildError::Cycle(c) => {
                assert_eq!(c.titles.first(), Some(&"A".to_owned()));
                assert_eq!(c.titles.last(), Some(&"A".to_owned()));
                assert!(c.titles.contains(&"B".to_owned()));
            }
            DagBuildError::UnknownDependency(_) => panic!("expected cycle"),
        }
    }

    #[test]
    fn unknown_dependency_rejected() {
        let mut t = Task::new("lonely", TaskType::Feature);
        t.depends_on = vec![TaskId::new()];
        let err = Dag::try_new(vec![t]).unwrap_err();
        assert!(matches!(err, DagBuildError::UnknownDependency(_)));
    }

    #[test]
    fn ready_tasks_respects_dependency_closure() {
        let a = task("a", &[]);
        let b = task("b", &[&a]);
        let mut dag = Dag::try_new(vec![a.clone(), b.clone()]).unwrap();
        let ready_titles: Vec<_> = dag.ready_tasks().iter().map(|t| t.title.clone()).collect();
        assert_eq!(ready_titles, vec!["a"]);

        dag.get_mut(&a.id).unwrap().status = TaskStatus::Completed;
        let ready_titles: Vec<_> = dag.ready_tasks().iter().map(|t| t.title.clone()).collect();
        assert_eq!(ready_titles, vec!["b"]);
    }

    #[test]
    fn descendant_count_counts_transitively() {
        let a = task("a", &[]);
        let b = task("b", &[&a]);
        let c = task("c", &[&b]);
        let dag = Dag::try_new(vec![a.clone(), b, c]).unwrap();
        assert_eq!(dag.descendant_count(&a.id), 2);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut a = Task::new("self", TaskType::Feature);
        a.depends_on = vec![a.id.clone()];
        let err = Dag::try_new(vec![a]).unwrap_err();
        assert!(matches!(err, DagBuildError::Cycle(_)));
    }
}
