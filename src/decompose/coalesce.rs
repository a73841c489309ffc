//! SETUP-task coalescing (§4.3 step 5): tasks that would touch the same
//! critical manifest/lockfile are merged into one before scheduling, since
//! concurrent writes to the same package manifest are the dominant source
//! of merge conflicts.

use std::collections::{HashMap, HashSet};

use crate::criticalfiles::critical_key;
use crate::model::dag::Dag;
use crate::model::task::{Task, TaskId, TaskType};

/// The result of a coalescing pass: a flat task list with SETUP groups
/// merged and every `depends_on` rewritten through the merge mapping.
pub(super) struct Coalesced(Vec<Task>);

impl Coalesced {
    pub(super) fn into_tasks(self) -> Vec<Task> {
        self.0
    }
}

struct UnionFind {
    parent: HashMap<TaskId, TaskId>,
}

impl UnionFind {
    fn new(ids: impl Iterator<Item = TaskId>) -> Self {
        Self {
            parent: ids.map(|id| (id.clone(), id)).collect(),
        }
    }

    fn find(&mut self, id: &TaskId) -> TaskId {
        let parent = self.parent[id].clone();
        if parent == *id {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(id.clone(), root.clone());
        root
    }

    fn union(&mut self, a: &TaskId, b: &TaskId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// Coalesce SETUP tasks whose `file_boundaries` share any critical basename
/// (§4.3 step 5, §8 S2). Returns the tasks with groups of size ≥ 2 merged
/// into a single survivor and every dependency reference rewritten.
pub(super) fn coalesce_setup_tasks(dag: Dag) -> Coalesced {
    let tasks: Vec<Task> = dag.tasks().cloned().collect();
    let setup_ids: Vec<TaskId> = tasks
        .iter()
        .filter(|t| t.task_type == TaskType::Setup)
        .map(|t| t.id.clone())
        .collect();

    if setup_ids.len() < 2 {
        return Coalesced(tasks);
    }

    let mut uf = UnionFind::new(setup_ids.iter().cloned());

    // Group SETUP tasks by the critical keys they touch, then union every
    // pair sharing a key.
    let mut by_key: HashMap<&'static str, Vec<TaskId>> = HashMap::new();
    for t in &tasks {
        if t.task_type != TaskType::Setup {
            continue;
        }
        for boundary in &t.file_boundaries {
            if let Some(key) = critical_key(boundary) {
                by_key.entry(key).or_default().push(t.id.clone());
            }
        }
    }
    for ids in by_key.values() {
        for pair in ids.windows(2) {
            uf.union(&pair[0], &pair[1]);
        }
    }

    // Build survivor -> member-ids groups (survivor = the root's own id, so
    // it stays a real, pre-existing task rather than a synthetic one).
    let mut groups: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for id in &setup_ids {
        let root = uf.find(id);
        groups.entry(root).or_default().push(id.clone());
    }

    // Mapping from merged-away id -> survivor id, used to rewrite `depends_on`.
    let mut remap: HashMap<TaskId, TaskId> = HashMap::new();
    let mut survivors: HashSet<TaskId> = HashSet::new();
    for (root, members) in &groups {
        if members.len() < 2 {
            continue;
        }
        let mut sorted = members.clone();
        sorted.sort();
        let survivor = sorted.first().cloned().unwrap_or_else(|| root.clone());
        survivors.insert(survivor.clone());
        for m in &sorted {
            remap.insert(m.clone(), survivor.clone());
        }
    }

    let by_id: HashMap<TaskId, Task> = tasks.iter().cloned().map(|t| (t.id.clone(), t)).collect();

    let mut merged: HashMap<TaskId, Task> = HashMap::new();
    for (merged_id, survivor_id) in &remap {
        let entry = merged
            .entry(survivor_id.clone())
            .or_insert_with(|| by_id[survivor_id].clone());
        if merged_id != survivor_id {
            let donor = &by_id[merged_id];
            for b in &donor.file_boundaries {
                if !entry.file_boundaries.contains(b) {
                    entry.file_boundaries.push(b.clone());
                }
            }
            for v in &donor.verification_intent {
                if !entry.verification_intent.contains(v) {
                    entry.verification_intent.push(v.clone());
                }
            }
            for d in &donor.depends_on {
                if !entry.depends_on.contains(d) {
                    entry.depends_on.push(d.clone());
                }
            }
            if !donor.acceptance_criteria.is_empty() && entry.acceptance_criteria != donor.acceptance_criteria {
                entry.acceptance_criteria.push_str("; ");
                entry.acceptance_criteria.push_str(&donor.acceptance_criteria);
            }
        }
    }

    let mut out = Vec::with_capacity(tasks.len());
    for t in tasks {
        if remap.contains_key(&t.id) && !survivors.contains(&t.id) {
            continue; // merged away
        }
        let mut t = merged.remove(&t.id).unwrap_or(t);
        t.depends_on = t
            .depends_on
            .iter()
            .map(|d| remap.get(d).cloned().unwrap_or_else(|| d.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        out.push(t);
    }

    Coalesced(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Task;

    #[test]
    fn coalesce_merges_setup_tasks_sharing_critical_key_s2() {
        let mut a = Task::new("setup a", TaskType::Setup);
        a.file_boundaries = vec!["package.json".to_owned()];
        let mut b = Task::new("setup b", TaskType::Setup);
        b.file_boundaries = vec!["package.json".to_owned(), "tsconfig.json".to_owned()];
        let mut c = Task::new("setup c", TaskType::Setup);
        c.file_boundaries = vec!["tsconfig.json".to_owned()];
        let mut consumer = Task::new("consumer", TaskType::Feature);
        consumer.depends_on = vec![a.id.clone(), c.id.clone()];

        let dag = Dag::try_new(vec![a, b, c, consumer]).unwrap();
        let coalesced = coalesce_setup_tasks(dag).into_tasks();

        let setup_count = coalesced.iter().filter(|t| t.task_type == TaskType::Setup).count();
        assert_eq!(setup_count, 1);

        let survivor_id = coalesced
            .iter()
            .find(|t| t.task_type == TaskType::Setup)
            .unwrap()
            .id
            .clone();
        let consumer = coalesced.iter().find(|t| t.title == "consumer").unwrap();
        assert_eq!(consumer.depends_on, vec![survivor_id]);
    }

    #[test]
    fn coalesce_is_noop_with_no_shared_keys() {
        let mut a = Task::new("setup a", TaskType::Setup);
        a.file_boundaries = vec!["package.json".to_owned()];
        let mut b = Task::new("setup b", TaskType::Setup);
        b.file_boundaries = vec!["go.mod".to_owned()];
        let dag = Dag::try_new(vec![a, b]).unwrap();
        let coalesced = coalesce_setup_tasks(dag).into_tasks();
        assert_eq!(coalesced.len(), 2);
    }
}
