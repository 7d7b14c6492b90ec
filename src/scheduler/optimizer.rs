//! Scheduling pass.
//!
//! A pass runs `Collect → Prioritize/Estimate → Order → Assign → Done`.
//! Scoring fans out over blocking worker threads; ordering and lane
//! assignment then run sequentially over the joined results. Any failure
//! after input validation degrades to a round-robin fallback schedule, so
//! only uncorrectable constraints ever reach the caller as an error.

use crate::scheduler::cache::ScheduleCache;
use crate::scheduler::calendar::WorkingCalendar;
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::lanes::LanePool;
use crate::scheduler::metrics::compute_metrics;
use crate::scheduler::predictor::{ExecutionTimePredictor, Prediction};
use crate::scheduler::priority::DynamicPriorityEngine;
use crate::task::types::*;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optimizer configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub cache_ttl_minutes: i64,
    pub sample_interval_minutes: i64,
    /// Scoring workers; `None` uses the available cores
    pub worker_threads: Option<usize>,
    pub max_lanes: u32,
}

/// Priority and duration computed for one task
#[derive(Clone, Copy, Debug)]
struct TaskScore {
    priority: f64,
    prediction: Prediction,
}

/// Builds time-ordered execution plans from task snapshots
pub struct SchedulingOptimizer {
    priority_engine: Arc<DynamicPriorityEngine>,
    predictor: Arc<ExecutionTimePredictor>,
    cache: ScheduleCache,
    config: OptimizerConfig,
}

impl SchedulingOptimizer {
    pub fn new(
        config: OptimizerConfig,
        priority_engine: Arc<DynamicPriorityEngine>,
        predictor: Arc<ExecutionTimePredictor>,
    ) -> Self {
        Self {
            cache: ScheduleCache::new(Duration::minutes(config.cache_ttl_minutes.max(0))),
            priority_engine,
            predictor,
            config,
        }
    }

    pub fn priority_engine(&self) -> &Arc<DynamicPriorityEngine> {
        &self.priority_engine
    }

    pub fn predictor(&self) -> &Arc<ExecutionTimePredictor> {
        &self.predictor
    }

    pub fn cache(&self) -> &ScheduleCache {
        &self.cache
    }

    /// Compute a schedule starting now
    pub async fn compute_schedule(
        &self,
        tasks: Vec<TaskEntry>,
        constraints: &SchedulingConstraint,
    ) -> Result<Schedule, SchedulingError> {
        self.compute_schedule_at(tasks, constraints, Utc::now()).await
    }

    /// Compute a schedule whose lanes open at `now`.
    ///
    /// Only [`SchedulingError::InvalidInput`] is ever returned; every other
    /// fault is absorbed by the fallback path.
    pub async fn compute_schedule_at(
        &self,
        tasks: Vec<TaskEntry>,
        constraints: &SchedulingConstraint,
        now: DateTime<Utc>,
    ) -> Result<Schedule, SchedulingError> {
        let constraints = constraints.normalized(self.config.max_lanes)?;
        let tasks = collect_tasks(tasks);
        self.predictor.prune_pending(Utc::now());

        let cache_key = ScheduleCache::fingerprint(&tasks, &constraints);
        if let Some(schedule) = self.cache.get(&cache_key, now) {
            debug!("Returning cached schedule for {} tasks", tasks.len());
            return Ok(schedule);
        }

        info!(
            "Computing schedule for {} tasks across {} lanes",
            tasks.len(),
            constraints.max_parallel_tasks
        );

        let graph = Arc::new(DependencyGraph::build(&tasks));
        let mut scores = HashMap::with_capacity(tasks.len());
        let outcome = match self.score_tasks(&tasks, &graph, now, &mut scores).await {
            Ok(()) => {
                self.order_and_assign(tasks.clone(), graph, scores.clone(), constraints.clone(), now)
                    .await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(schedule) => {
                info!(
                    "Scheduled {} tasks: span {:.0}s, parallelization {:.2}, compliance {:.2}",
                    schedule.tasks.len(),
                    schedule.metrics.total_span_seconds,
                    schedule.metrics.parallelization_factor,
                    schedule.metrics.deadline_compliance_ratio
                );
                self.cache.insert(cache_key, schedule.clone(), now);
                Ok(schedule)
            }
            Err(err) => {
                warn!("Scheduling pass degraded to fallback: {}", err);
                Ok(self.fallback_schedule(&tasks, &scores, &constraints, now))
            }
        }
    }

    fn worker_count(&self) -> usize {
        self.config
            .worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1)
    }

    /// Score every task on blocking workers, merging results into `scores`.
    ///
    /// Successful batches are kept even when another batch fails so the
    /// fallback can reuse them.
    async fn score_tasks(
        &self,
        tasks: &[TaskEntry],
        graph: &Arc<DependencyGraph>,
        now: DateTime<Utc>,
        scores: &mut HashMap<TaskId, TaskScore>,
    ) -> Result<(), SchedulingError> {
        if tasks.is_empty() {
            return Ok(());
        }

        let workers = self.worker_count().min(tasks.len());
        let chunk_size = tasks.len().div_ceil(workers);

        let handles = tasks.chunks(chunk_size).map(|chunk| {
            let chunk = chunk.to_vec();
            let engine = Arc::clone(&self.priority_engine);
            let predictor = Arc::clone(&self.predictor);
            let graph = Arc::clone(graph);
            tokio::task::spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|task| {
                        let dependents = graph.dependent_count(&task.id);
                        let score = TaskScore {
                            priority: engine.compute_dynamic_priority(task, dependents, now),
                            prediction: predictor.predict_execution_time(task),
                        };
                        (task.id.clone(), score)
                    })
                    .collect::<Vec<_>>()
            })
        });

        let mut failure = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(batch) => scores.extend(batch),
                Err(err) => {
                    failure = Some(SchedulingError::SchedulingFailure(format!(
                        "scoring worker failed: {}",
                        err
                    )))
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn order_and_assign(
        &self,
        tasks: Vec<TaskEntry>,
        graph: Arc<DependencyGraph>,
        scores: HashMap<TaskId, TaskScore>,
        constraints: SchedulingConstraint,
        now: DateTime<Utc>,
    ) -> Result<Schedule, SchedulingError> {
        let sample_interval = Duration::minutes(self.config.sample_interval_minutes.max(1));
        tokio::task::spawn_blocking(move || {
            build_plan(&tasks, &graph, &scores, &constraints, now, sample_interval)
        })
        .await
        .map_err(|err| {
            SchedulingError::SchedulingFailure(format!("ordering worker failed: {}", err))
        })?
    }

    /// Round-robin, priority-sorted schedule built from whatever scores exist
    fn fallback_schedule(
        &self,
        tasks: &[TaskEntry],
        scores: &HashMap<TaskId, TaskScore>,
        constraints: &SchedulingConstraint,
        now: DateTime<Utc>,
    ) -> Schedule {
        let default_seconds = self.predictor.config().default_seconds;
        let mut entries: Vec<(&TaskEntry, f64, f64)> = tasks
            .iter()
            .map(|task| match scores.get(&task.id) {
                Some(score) => (task, score.priority, score.prediction.seconds),
                None => (
                    task,
                    self.priority_engine.base_weight(task.priority),
                    default_seconds,
                ),
            })
            .collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));

        let lanes = constraints.max_parallel_tasks.max(1) as usize;
        let mut lane_free = vec![now; lanes];
        let mut placed: HashSet<&str> = HashSet::new();
        let mut scheduled = Vec::with_capacity(entries.len());

        for (index, (task, priority, seconds)) in entries.into_iter().enumerate() {
            let lane_id = index % lanes;
            let start = lane_free[lane_id];
            let end = Duration::try_seconds(seconds.round() as i64)
                .and_then(|delta| start.checked_add_signed(delta))
                .unwrap_or(start);
            lane_free[lane_id] = end;

            let dependencies_met = task
                .prerequisite_ids()
                .filter(|id| *id != task.id && tasks.iter().any(|t| t.id == *id))
                .all(|id| placed.contains(id));
            placed.insert(task.id.as_str());

            scheduled.push(ScheduledTask {
                task: task.clone(),
                dynamic_priority: priority,
                predicted_duration: seconds,
                scheduled_start: start,
                scheduled_end: end,
                lane_id,
                dependencies_met,
            });
        }

        let sample_interval = Duration::minutes(self.config.sample_interval_minutes.max(1));
        let mut metrics = compute_metrics(&scheduled, sample_interval);
        metrics.fallback_used = true;
        Schedule {
            tasks: scheduled,
            metrics,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 15,
            sample_interval_minutes: 15,
            worker_threads: None,
            max_lanes: 256,
        }
    }
}

/// Drop terminal and duplicate tasks; duplicates keep the first snapshot.
///
/// Structural problems are logged and left for the graph to correct.
fn collect_tasks(tasks: Vec<TaskEntry>) -> Vec<TaskEntry> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| {
            if task.is_terminal() {
                debug!("Skipping terminal task {}", task.id);
                return false;
            }
            if !seen.insert(task.id.clone()) {
                warn!("Ignoring duplicate snapshot of task {}", task.id);
                return false;
            }
            if let Err(err) = task.validate() {
                warn!("Scheduling malformed task anyway: {}", err);
            }
            true
        })
        .collect()
}

/// Booked seconds once the buffer is applied
fn booked_seconds(predicted: f64, buffer_percent: f64) -> i64 {
    (predicted * (1.0 + buffer_percent / 100.0)).round() as i64
}

/// Order the graph and place each task on a lane
fn build_plan(
    tasks: &[TaskEntry],
    graph: &DependencyGraph,
    scores: &HashMap<TaskId, TaskScore>,
    constraints: &SchedulingConstraint,
    now: DateTime<Utc>,
    sample_interval: Duration,
) -> Result<Schedule, SchedulingError> {
    let priorities: HashMap<TaskId, f64> = scores
        .iter()
        .map(|(id, score)| (id.clone(), score.priority))
        .collect();

    let topology = graph.topological_order(&priorities);
    if !topology.cyclic.is_empty() {
        let cycle = SchedulingError::CyclicDependency {
            task_ids: topology.cyclic.clone(),
        };
        warn!("{}; ordering the affected tasks by priority", cycle);
    }

    let by_id: HashMap<&str, &TaskEntry> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let calendar = WorkingCalendar::from_constraint(constraints);
    let mut pool = LanePool::new(constraints.max_parallel_tasks as usize, now, calendar);
    let mut finished_at: HashMap<&str, DateTime<Utc>> = HashMap::with_capacity(tasks.len());
    let mut scheduled = Vec::with_capacity(tasks.len());

    for id in &topology.order {
        let task = by_id.get(id.as_str()).ok_or_else(|| {
            SchedulingError::SchedulingFailure(format!("ordered task {} has no snapshot", id))
        })?;
        let score = scores.get(id).ok_or_else(|| {
            SchedulingError::SchedulingFailure(format!("task {} was never scored", id))
        })?;

        let mut floor = now;
        let mut dependencies_met = true;
        for prerequisite in graph.prerequisites(id) {
            match finished_at.get(prerequisite.as_str()) {
                Some(end) => floor = floor.max(*end),
                None => dependencies_met = false,
            }
        }

        let booked = booked_seconds(score.prediction.seconds, constraints.buffer_time_percent);
        let mut placement = pool.place(pool.earliest_lane(), floor, booked)?;

        if constraints.respect_due_dates && !constraints.allow_overtime {
            if let Some(due) = task.due_date.filter(|due| placement.end > *due) {
                // Nothing can finish on time once the due date is behind the floor
                if due > floor {
                    if let Some(pulled) = pool.best_backfill(floor, booked)? {
                        if pulled.end < placement.end {
                            debug!(
                                "Pulled task {} to lane {} to finish at {} (due {})",
                                id, pulled.lane_id, pulled.end, due
                            );
                            placement = pulled;
                        }
                    }
                }
                if placement.end > due {
                    debug!("Task {} is scheduled past its due date {}", id, due);
                }
            }
        }

        pool.commit(&placement);
        finished_at.insert(task.id.as_str(), placement.end);
        scheduled.push(ScheduledTask {
            task: (*task).clone(),
            dynamic_priority: score.priority,
            predicted_duration: score.prediction.seconds,
            scheduled_start: placement.start,
            scheduled_end: placement.end,
            lane_id: placement.lane_id,
            dependencies_met,
        });
    }

    let mut metrics = compute_metrics(&scheduled, sample_interval);
    metrics.cyclic_task_ids = topology.cyclic;
    Ok(Schedule {
        tasks: scheduled,
        metrics,
    })
}
