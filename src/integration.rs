//! # Planner System Integration
//!
//! Wires the scheduling engine to its collaborators and exposes the
//! operations callers use.
//!
//! ## Core Components
//!
//! - **[`PlannerSystem`]**: owns the optimizer, the shared predictor and
//!   priority engine, and the model checkpoint store
//! - **[`TaskRepository`]**: source of task snapshots
//! - **[`ResourceMonitor`]**: advisory CPU and memory utilization
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                PlannerSystem                  │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ │
//! │  │ Scheduling │ │ Execution  │ │   Model    │ │
//! │  │ Optimizer  │ │ Predictor  │ │   Store    │ │
//! │  └────────────┘ └────────────┘ └────────────┘ │
//! └───────────────────────────────────────────────┘
//!        ▲                              ▲
//!   TaskRepository               ResourceMonitor
//! ```
//!
//! Collaborator calls are retried once without backoff. A second failure is
//! treated as missing data (an empty task list or 0% utilization) so a pass
//! still completes.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskplan::{
//!     InMemoryTaskRepository, PlannerConfig, PlannerSystem, StaticResourceMonitor, TaskEntry,
//!     TaskPriority, TaskType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repository = Arc::new(InMemoryTaskRepository::new());
//!     repository.upsert(TaskEntry::new("Fix login", TaskType::BugFix, TaskPriority::High));
//!
//!     let planner = PlannerSystem::new(
//!         PlannerConfig::default(),
//!         repository,
//!         Arc::new(StaticResourceMonitor::default()),
//!     )
//!     .await?;
//!
//!     let schedule = planner.plan_pending(None).await?;
//!     println!("{} tasks over {:.0}s", schedule.tasks.len(), schedule.metrics.total_span_seconds);
//!
//!     planner.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::config::PlannerConfig;
use crate::persistence::{CheckpointResult, ModelStore};
use crate::scheduler::{DynamicPriorityEngine, ExecutionTimePredictor, SchedulingOptimizer};
use crate::task::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Source of task snapshots
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskEntry>>;

    /// `None` when no task has this id
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskEntry>>;
}

/// Advisory system utilization
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn current_utilization(&self) -> Result<ResourceUtilization>;
}

/// Selects tasks from a repository. Empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskFilter {
    pub statuses: Vec<TaskStatus>,
    pub task_types: Vec<TaskType>,
    /// Tasks must carry every listed tag
    pub tags: Vec<String>,
}

impl TaskFilter {
    /// Tasks that still need scheduling
    pub fn schedulable() -> Self {
        Self {
            statuses: vec![TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Blocked],
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &TaskEntry) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && (self.task_types.is_empty() || self.task_types.contains(&task.task_type))
            && self.tags.iter().all(|tag| task.tags.contains(tag))
    }
}

/// Task repository backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<TaskId, TaskEntry>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task, returning the previous snapshot
    pub fn upsert(&self, task: TaskEntry) -> Option<TaskEntry> {
        self.tasks.insert(task.id.clone(), task)
    }

    pub fn remove(&self, task_id: &str) -> Option<TaskEntry> {
        self.tasks.remove(task_id).map(|(_, task)| task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskEntry>> {
        let mut tasks: Vec<TaskEntry> = self
            .tasks
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskEntry>> {
        Ok(self.tasks.get(task_id).map(|entry| entry.value().clone()))
    }
}

/// Resource monitor reporting a fixed utilization
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResourceMonitor {
    pub utilization: ResourceUtilization,
}

impl StaticResourceMonitor {
    pub fn new(cpu_percent: f64, mem_percent: f64) -> Self {
        Self {
            utilization: ResourceUtilization {
                cpu_percent,
                mem_percent,
            },
        }
    }
}

#[async_trait]
impl ResourceMonitor for StaticResourceMonitor {
    async fn current_utilization(&self) -> Result<ResourceUtilization> {
        Ok(self.utilization)
    }
}

/// Run a collaborator call, retrying once immediately on failure
pub async fn retry_once<T, F, Fut>(operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!("{} failed, retrying once: {:#}", operation, first);
            call()
                .await
                .with_context(|| format!("{} failed after retry", operation))
        }
    }
}

/// Scheduling engine wired to its collaborators
pub struct PlannerSystem {
    config: PlannerConfig,
    optimizer: Arc<SchedulingOptimizer>,
    priority_engine: Arc<DynamicPriorityEngine>,
    predictor: Arc<ExecutionTimePredictor>,
    repository: Arc<dyn TaskRepository>,
    monitor: Arc<dyn ResourceMonitor>,
    store: Arc<ModelStore>,
    checkpoint_task: Mutex<Option<JoinHandle<()>>>,
}

impl PlannerSystem {
    /// Build the engine and restore any checkpointed prediction models.
    ///
    /// An unreadable checkpoint is logged and the predictor starts cold.
    pub async fn new(
        config: PlannerConfig,
        repository: Arc<dyn TaskRepository>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Result<Self> {
        let priority_engine = Arc::new(DynamicPriorityEngine::new(config.priority.clone()));
        let predictor = Arc::new(ExecutionTimePredictor::new(config.predictor.clone()));
        let optimizer = Arc::new(SchedulingOptimizer::new(
            config.optimizer.clone(),
            Arc::clone(&priority_engine),
            Arc::clone(&predictor),
        ));
        let store = Arc::new(ModelStore::new(config.persistence.clone()));

        match store.load().await {
            Ok(Some(checkpoint)) => predictor.import_models(checkpoint.models),
            Ok(None) => info!("No model checkpoint found, starting with cold-start models"),
            Err(e) => error!("Ignoring unreadable model checkpoint: {:#}", e),
        }

        info!(
            "Planner initialized with {} scoring workers configured",
            config
                .optimizer
                .worker_threads
                .map_or_else(|| "auto".to_string(), |n| n.to_string())
        );

        Ok(Self {
            config,
            optimizer,
            priority_engine,
            predictor,
            repository,
            monitor,
            store,
            checkpoint_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn optimizer(&self) -> Arc<SchedulingOptimizer> {
        Arc::clone(&self.optimizer)
    }

    pub fn predictor(&self) -> Arc<ExecutionTimePredictor> {
        Arc::clone(&self.predictor)
    }

    pub fn priority_engine(&self) -> Arc<DynamicPriorityEngine> {
        Arc::clone(&self.priority_engine)
    }

    /// Schedule the given tasks and attach the current utilization
    pub async fn compute_schedule(
        &self,
        tasks: Vec<TaskEntry>,
        constraints: &SchedulingConstraint,
    ) -> Result<Schedule, SchedulingError> {
        let mut schedule = self.optimizer.compute_schedule(tasks, constraints).await?;
        schedule.metrics.utilization = Some(self.current_utilization().await);
        Ok(schedule)
    }

    /// Schedule every task the repository reports as still open
    pub async fn plan_pending(
        &self,
        constraints: Option<&SchedulingConstraint>,
    ) -> Result<Schedule, SchedulingError> {
        let filter = TaskFilter::schedulable();
        let tasks = match retry_once("list_tasks", || self.repository.list_tasks(&filter)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Task repository unavailable, planning with no tasks: {:#}", e);
                Vec::new()
            }
        };

        let constraints = constraints.unwrap_or(&self.config.default_constraints);
        self.compute_schedule(tasks, constraints).await
    }

    /// Forecast when `task` would finish if started now
    pub fn predict_completion(&self, task: &TaskEntry) -> Result<PredictionResult, SchedulingError> {
        self.predictor.predict_completion(task, Utc::now())
    }

    /// Feed an observed duration back into the task type's model.
    ///
    /// When no prediction is on record the task is fetched from the
    /// repository and predicted first.
    pub async fn record_actual_duration(
        &self,
        task_id: &str,
        actual_seconds: f64,
    ) -> Result<(), SchedulingError> {
        if !self.predictor.has_pending(task_id) {
            debug!("No prediction on record for {}, fetching task", task_id);
            let task = retry_once("get_task", || self.repository.get_task(task_id))
                .await
                .map_err(|e| {
                    SchedulingError::InvalidInput(format!(
                        "task {} could not be fetched: {:#}",
                        task_id, e
                    ))
                })?
                .ok_or_else(|| SchedulingError::InvalidInput(format!("unknown task {}", task_id)))?;
            self.predictor.predict_execution_time(&task);
        }

        self.predictor.update_prediction(task_id, actual_seconds)
    }

    /// Feed an observed outcome back into priority learning
    pub fn record_task_outcome(&self, task_id: &str, outcome: TaskOutcome) {
        self.priority_engine.update_priority_learning(task_id, outcome);
    }

    /// Write the current prediction models to disk
    pub async fn checkpoint(&self) -> Result<CheckpointResult, SchedulingError> {
        self.store
            .save(self.predictor.export_models())
            .await
            .map_err(|e| SchedulingError::Persistence(format!("{:#}", e)))
    }

    /// Start the periodic checkpoint loop. Returns false when disabled by config.
    pub async fn start_checkpointing(&self) -> bool {
        let secs = self.config.persistence.checkpoint_interval_secs;
        if secs == 0 {
            info!("Periodic model checkpoints disabled");
            return false;
        }

        let mut slot = self.checkpoint_task.lock().await;
        if slot.is_some() {
            debug!("Checkpoint loop already running");
            return true;
        }

        let store = Arc::clone(&self.store);
        let predictor = Arc::clone(&self.predictor);
        *slot = Some(tokio::spawn(async move {
            let mut interval_timer = interval(StdDuration::from_secs(secs));
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;
                match store.save(predictor.export_models()).await {
                    Ok(result) => debug!("Periodic checkpoint wrote {} bytes", result.bytes_written),
                    Err(e) => error!("Periodic checkpoint failed: {:#}", e),
                }
            }
        }));

        info!("Model checkpoints scheduled every {}s", secs);
        true
    }

    /// Stop the checkpoint loop and write a final checkpoint
    pub async fn shutdown(&self) -> Result<(), SchedulingError> {
        info!("Shutting down planner...");
        if let Some(handle) = self.checkpoint_task.lock().await.take() {
            handle.abort();
        }

        self.checkpoint().await?;
        info!("Planner shutdown complete");
        Ok(())
    }

    async fn current_utilization(&self) -> ResourceUtilization {
        match retry_once("current_utilization", || self.monitor.current_utilization()).await {
            Ok(utilization) => utilization,
            Err(e) => {
                warn!("Resource monitor unavailable, assuming idle: {:#}", e);
                ResourceUtilization::default()
            }
        }
    }
}
