//! Dynamic priority scoring.
//!
//! Maps a task snapshot and the current time to an unbounded urgency score
//! (higher is more urgent). The score combines four terms:
//!
//! - the static priority base weight (critical=100 … deferred=10)
//! - a due-date urgency term that grows as the due date approaches
//! - a bonus for every downstream task this one blocks
//! - a learned per-task adjustment fed back from observed outcomes

use crate::task::types::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Weights for the dynamic priority formula
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriorityWeights {
    pub critical_weight: f64,
    pub high_weight: f64,
    pub medium_weight: f64,
    pub low_weight: f64,
    pub deferred_weight: f64,
    /// Urgency contributed by a task that is due right now
    pub urgency_scale: f64,
    /// Hours before the due date at which urgency reaches half of `urgency_scale`
    pub urgency_half_life_hours: f64,
    pub overdue_bonus_per_hour: f64,
    pub overdue_bonus_cap: f64,
    pub dependent_bonus: f64,
    pub dependent_bonus_cap: f64,
    pub learning_step: f64,
    pub learning_cap: f64,
}

/// Priority engine with per-task learned adjustments
pub struct DynamicPriorityEngine {
    weights: PriorityWeights,
    adjustments: DashMap<TaskId, f64>,
}

impl DynamicPriorityEngine {
    pub fn new(weights: PriorityWeights) -> Self {
        Self {
            weights,
            adjustments: DashMap::new(),
        }
    }

    pub fn weights(&self) -> &PriorityWeights {
        &self.weights
    }

    /// Compute the urgency score for `task` at `now`.
    ///
    /// `dependents` is the number of tasks in the current pass that list this
    /// task as a prerequisite. Never fails: non-finite intermediate values
    /// degrade to the static base weight.
    pub fn compute_dynamic_priority(
        &self,
        task: &TaskEntry,
        dependents: usize,
        now: DateTime<Utc>,
    ) -> f64 {
        let base = self.base_weight(task.priority);
        let urgency = self.due_date_urgency(task.due_date, now);
        let dependent_bonus =
            (dependents as f64 * self.weights.dependent_bonus).min(self.weights.dependent_bonus_cap);
        let adjustment = self.adjustment(&task.id);

        let score = base + urgency + dependent_bonus + adjustment;
        if score.is_finite() { score } else { base }
    }

    /// Static weight for a priority label
    pub fn base_weight(&self, priority: TaskPriority) -> f64 {
        match priority {
            TaskPriority::Critical => self.weights.critical_weight,
            TaskPriority::High => self.weights.high_weight,
            TaskPriority::Medium => self.weights.medium_weight,
            TaskPriority::Low => self.weights.low_weight,
            TaskPriority::Deferred => self.weights.deferred_weight,
        }
    }

    /// Non-negative urgency, monotonically increasing as the due date approaches
    fn due_date_urgency(&self, due_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(due) = due_date else {
            return 0.0;
        };

        let hours_left = due.signed_duration_since(now).num_seconds() as f64 / 3600.0;
        if hours_left >= 0.0 {
            let half_life = self.weights.urgency_half_life_hours.max(f64::EPSILON);
            self.weights.urgency_scale * half_life / (half_life + hours_left)
        } else {
            let overdue = (-hours_left * self.weights.overdue_bonus_per_hour)
                .min(self.weights.overdue_bonus_cap);
            self.weights.urgency_scale + overdue
        }
    }

    /// Current learned adjustment for a task (0.0 when none recorded)
    pub fn adjustment(&self, task_id: &str) -> f64 {
        self.adjustments
            .get(task_id)
            .map(|entry| *entry)
            .unwrap_or(0.0)
    }

    /// Feed an observed outcome back into the task's adjustment
    pub fn update_priority_learning(&self, task_id: &str, outcome: TaskOutcome) {
        let step = self.weights.learning_step;
        let cap = self.weights.learning_cap;

        if outcome == TaskOutcome::Cancelled {
            self.adjustments.remove(task_id);
            debug!("Cleared priority adjustment for cancelled task {}", task_id);
            return;
        }

        let mut entry = self.adjustments.entry(task_id.to_string()).or_insert(0.0);
        let delta = match outcome {
            TaskOutcome::CompletedLate => step,
            TaskOutcome::Failed => step * 0.5,
            TaskOutcome::CompletedOnTime => -step * 0.5,
            TaskOutcome::Cancelled => 0.0,
        };
        *entry = (*entry + delta).clamp(-cap, cap);

        debug!(
            "Priority adjustment for task {} is now {:.2} after {:?}",
            task_id, *entry, outcome
        );
    }
}

impl Default for DynamicPriorityEngine {
    fn default() -> Self {
        Self::new(PriorityWeights::default())
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical_weight: 100.0,
            high_weight: 75.0,
            medium_weight: 50.0,
            low_weight: 25.0,
            deferred_weight: 10.0,
            urgency_scale: 100.0,
            urgency_half_life_hours: 24.0,
            overdue_bonus_per_hour: 0.5,
            overdue_bonus_cap: 50.0,
            dependent_bonus: 5.0,
            dependent_bonus_cap: 25.0,
            learning_step: 5.0,
            learning_cap: 20.0,
        }
    }
}
