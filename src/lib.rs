//! # Taskplan
//!
//! A task scheduling engine that turns a snapshot of pending work into a
//! time-ordered, lane-assigned execution plan. Priorities adapt to due dates,
//! blocked work and observed outcomes, and durations are predicted by
//! per-category models that learn from reported actuals.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task snapshots, scheduling constraints, schedule output and errors
//! - **[`scheduler`]**: Priority engine, duration predictor and the scheduling optimizer
//! - **[`persistence`]**: Checkpoints of the learned prediction models
//! - **[`integration`]**: [`PlannerSystem`] wiring the engine to its collaborators
//! - **[`config`]**: TOML configuration and discovery
//!
//! ## Features
//!
//! ### 🎯 Scheduling
//! - **Dependency Ordering**: Kahn ordering with a priority heap and id tie-breaks
//! - **Lanes**: Parallel timelines with working-hours snapping and weekend skipping
//! - **Deadlines**: Best-effort backfill for late work, with compliance metrics
//! - **Graceful Degradation**: Cycles and internal faults still yield a usable schedule
//!
//! ### 📈 Prediction
//! - **Per-Type Models**: One learned model per task category
//! - **Confidence Intervals**: Derived from the rolling error history
//! - **Online Learning**: Actual durations refine the models as they arrive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskplan::{
//!     DependencyKind, DynamicPriorityEngine, ExecutionTimePredictor, OptimizerConfig,
//!     SchedulingConstraint, SchedulingOptimizer, TaskEntry, TaskPriority, TaskType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let optimizer = SchedulingOptimizer::new(
//!         OptimizerConfig::default(),
//!         Arc::new(DynamicPriorityEngine::default()),
//!         Arc::new(ExecutionTimePredictor::default()),
//!     );
//!
//!     let design = TaskEntry::new("Design API", TaskType::Research, TaskPriority::High);
//!     let build = TaskEntry::new("Build API", TaskType::Development, TaskPriority::Medium)
//!         .depends_on(&design.id, DependencyKind::Blocks);
//!
//!     let schedule = optimizer
//!         .compute_schedule(vec![design, build], &SchedulingConstraint::default())
//!         .await?;
//!
//!     for task in &schedule.tasks {
//!         println!("{} on lane {} at {}", task.task.title, task.lane_id, task.scheduled_start);
//!     }
//!     Ok(())
//! }
//! ```

/// Task data model.
///
/// Task snapshots, constraints, schedule output types and the
/// scheduling error taxonomy.
pub mod task;

/// Scheduling engine.
///
/// Dynamic priority scoring, execution time prediction, dependency ordering,
/// lane assignment and the optimizer pass that ties them together.
pub mod scheduler;

/// Prediction model checkpoints.
pub mod persistence;

/// High-level system integration.
///
/// Collaborator interfaces, retry policy and the exposed planner operations.
pub mod integration;

/// Host resource monitoring.
pub mod resources;

/// Configuration loading and discovery.
pub mod config;

/// Environment constants and path utilities.
pub mod env;

// Re-export main task types
pub use task::{
    DependencyKind, IntervalKind, PredictionResult, ResourceUtilization, Schedule,
    ScheduleMetrics, ScheduledTask, SchedulingConstraint, SchedulingError, TaskEntry, TaskId,
    TaskOutcome, TaskPriority, TaskStatus, TaskType,
};

// Re-export scheduler types
pub use scheduler::{
    DynamicPriorityEngine, ExecutionTimePredictor, OptimizerConfig, PredictorConfig,
    PriorityWeights, SchedulingOptimizer,
};

// Re-export integration types
pub use config::{ConfigDiscovery, PlannerConfig};
pub use integration::{
    InMemoryTaskRepository, PlannerSystem, ResourceMonitor, StaticResourceMonitor, TaskFilter,
    TaskRepository,
};
pub use persistence::{ModelStore, PersistenceConfig};
pub use resources::SystemResourceMonitor;
