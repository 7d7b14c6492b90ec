use crate::task::types::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use tracing::debug;

/// Prerequisite graph for a single scheduling pass
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    prerequisites: BTreeMap<TaskId, BTreeSet<TaskId>>,
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

/// Result of ordering the graph
#[derive(Clone, Debug, PartialEq)]
pub struct TopologicalOrder {
    /// Every task exactly once
    pub order: Vec<TaskId>,
    /// Tasks that could not be placed by dependency order, appended by priority
    pub cyclic: Vec<TaskId>,
}

/// Entry in the ready queue: highest priority first, then lowest id
#[derive(Debug)]
struct ReadyTask<'a> {
    priority: f64,
    id: &'a str,
}

impl PartialEq for ReadyTask<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyTask<'_> {}

impl PartialOrd for ReadyTask<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyTask<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.id.cmp(self.id))
    }
}

impl DependencyGraph {
    /// Build the graph from task snapshots.
    ///
    /// Dependencies on ids outside `tasks`, self-references and informational
    /// links are dropped.
    pub fn build(tasks: &[TaskEntry]) -> Self {
        let mut graph = Self::default();
        for task in tasks {
            graph.prerequisites.entry(task.id.clone()).or_default();
            graph.dependents.entry(task.id.clone()).or_default();
        }

        for task in tasks {
            for prerequisite in task.prerequisite_ids() {
                if prerequisite == task.id {
                    debug!("Ignoring self-dependency on task {}", task.id);
                    continue;
                }
                if !graph.prerequisites.contains_key(prerequisite) {
                    debug!(
                        "Dropping dependency of {} on unknown task {}",
                        task.id, prerequisite
                    );
                    continue;
                }
                if let Some(set) = graph.prerequisites.get_mut(&task.id) {
                    set.insert(prerequisite.to_string());
                }
                if let Some(set) = graph.dependents.get_mut(prerequisite) {
                    set.insert(task.id.clone());
                }
            }
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.prerequisites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prerequisites.is_empty()
    }

    /// Prerequisites of a task within this pass
    pub fn prerequisites(&self, task_id: &str) -> impl Iterator<Item = &TaskId> {
        self.prerequisites.get(task_id).into_iter().flatten()
    }

    /// Number of tasks that list `task_id` as a prerequisite
    pub fn dependent_count(&self, task_id: &str) -> usize {
        self.dependents.get(task_id).map_or(0, BTreeSet::len)
    }

    /// Kahn's algorithm with a max-heap on priority as the tie-break.
    ///
    /// Tasks left over when the ready queue runs dry sit on or behind a cycle;
    /// they are appended by descending priority instead of aborting.
    pub fn topological_order(&self, priorities: &HashMap<TaskId, f64>) -> TopologicalOrder {
        let priority_of = |id: &str| priorities.get(id).copied().unwrap_or(0.0);

        let mut in_degree: HashMap<&str, usize> = self
            .prerequisites
            .iter()
            .map(|(id, prereqs)| (id.as_str(), prereqs.len()))
            .collect();

        let mut ready: BinaryHeap<ReadyTask> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| ReadyTask {
                priority: priority_of(*id),
                id: *id,
            })
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(next) = ready.pop() {
            order.push(next.id.to_string());
            for dependent in self.dependents.get(next.id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(ReadyTask {
                            priority: priority_of(dependent.as_str()),
                            id: dependent.as_str(),
                        });
                    }
                }
            }
        }

        let mut cyclic: Vec<TaskId> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        cyclic.sort_by(|a, b| {
            priority_of(b.as_str())
                .total_cmp(&priority_of(a.as_str()))
                .then_with(|| a.cmp(b))
        });
        order.extend(cyclic.iter().cloned());

        TopologicalOrder { order, cyclic }
    }
}
