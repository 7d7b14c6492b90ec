use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = String;

/// Point-in-time snapshot of a unit of pending work
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskEntry {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub dependencies: Vec<TaskDependency>,
    pub resource_requests: Vec<ResourceRequest>,
    pub due_date: Option<DateTime<Utc>>,
    /// Caller-supplied duration estimate in seconds
    pub estimated_seconds: Option<f64>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of task categories, each owning its own prediction model
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Development,
    BugFix,
    Testing,
    Documentation,
    Research,
    Deployment,
    Maintenance,
    Review,
    Incident,
    /// Default bucket for unrecognized legacy type strings
    #[serde(other)]
    General,
}

/// Static priority label. Deserialization goes through
/// [`TaskPriority::from_legacy`], so unknown labels become `Medium`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
    Deferred,
}

/// Task lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

/// Task dependency relationship
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskDependency {
    pub task_id: TaskId,
    pub kind: DependencyKind,
}

/// Types of task dependencies
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// The referenced task blocks this one
    Blocks,
    /// This task requires the output of the referenced task
    Requires,
    /// Informational link; imposes no ordering
    RelatesTo,
}

/// A resource the task needs while it runs
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResourceRequest {
    pub resource: String,
    pub amount: f64,
}

/// Constraints applied to a single scheduling pass
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SchedulingConstraint {
    pub max_parallel_tasks: u32,
    pub max_daily_hours: f64,
    /// Hour of day (UTC) at which the working window opens
    pub working_hours_start: u32,
    /// Hour of day (UTC) at which the working window closes
    pub working_hours_end: u32,
    pub respect_due_dates: bool,
    pub allow_overtime: bool,
    pub buffer_time_percent: f64,
}

/// A task placed on a lane with a concrete time window
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScheduledTask {
    pub task: TaskEntry,
    pub dynamic_priority: f64,
    /// Predicted duration in seconds, before buffering
    pub predicted_duration: f64,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub lane_id: usize,
    pub dependencies_met: bool,
}

/// Summary statistics for a computed schedule
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScheduleMetrics {
    pub total_span_seconds: f64,
    pub parallelization_factor: f64,
    pub deadline_compliance_ratio: f64,
    pub lanes_used: usize,
    pub late_task_ids: Vec<TaskId>,
    pub cyclic_task_ids: Vec<TaskId>,
    pub fallback_used: bool,
    pub from_cache: bool,
    pub utilization: Option<ResourceUtilization>,
}

/// Ordered schedule plus its metrics
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Schedule {
    pub tasks: Vec<ScheduledTask>,
    pub metrics: ScheduleMetrics,
}

/// How a prediction interval was derived
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    /// ±1.96 standard deviations of the rolling error history
    Statistical,
    /// Flat percentage margin used before enough samples exist
    Flat,
    /// Safe default returned after an internal predictor fault
    Default,
}

/// Completion forecast for a single task
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResult {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub predicted_seconds: f64,
    pub low_seconds: f64,
    pub high_seconds: f64,
    pub interval_kind: IntervalKind,
    pub sample_count: usize,
    pub estimated_completion: DateTime<Utc>,
}

/// Advisory utilization reported by a resource monitor
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct ResourceUtilization {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Observed outcome of a task, fed back into priority learning
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    CompletedOnTime,
    CompletedLate,
    Failed,
    Cancelled,
}

/// Scheduling engine errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    /// Malformed input that cannot be auto-corrected
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Prediction unavailable: {0}")]
    PredictionUnavailable(String),

    #[error("Cyclic dependency among tasks: {}", task_ids.join(", "))]
    CyclicDependency { task_ids: Vec<TaskId> },

    #[error("Scheduling failure: {0}")]
    SchedulingFailure(String),

    /// Model checkpoint could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl SchedulingError {
    /// Whether the engine degrades gracefully instead of surfacing this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SchedulingError::InvalidInput(_))
    }
}

impl TaskEntry {
    /// Create a pending task with a generated id
    pub fn new(title: &str, task_type: TaskType, priority: TaskPriority) -> Self {
        Self::with_id(&Uuid::new_v4().to_string(), title, task_type, priority)
    }

    /// Create a pending task with an explicit id
    pub fn with_id(id: &str, title: &str, task_type: TaskType, priority: TaskPriority) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            task_type,
            priority,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            resource_requests: Vec::new(),
            due_date: None,
            estimated_seconds: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a prerequisite of the given kind; duplicates and self-references are ignored
    pub fn depends_on(mut self, task_id: &str, kind: DependencyKind) -> Self {
        let dependency = TaskDependency {
            task_id: task_id.to_string(),
            kind,
        };
        if task_id != self.id && !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_estimate(mut self, seconds: f64) -> Self {
        self.estimated_seconds = Some(seconds);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn with_resource(mut self, resource: &str, amount: f64) -> Self {
        self.resource_requests.push(ResourceRequest {
            resource: resource.to_string(),
            amount,
        });
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Check if task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Ids of the tasks that must finish before this one can start
    pub fn prerequisite_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|dep| dep.kind.is_prerequisite())
            .map(|dep| dep.task_id.as_str())
    }

    /// Check structural invariants of the snapshot
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.id.trim().is_empty() {
            return Err(SchedulingError::InvalidInput(
                "task id must not be empty".to_string(),
            ));
        }
        if self.dependencies.iter().any(|dep| dep.task_id == self.id) {
            return Err(SchedulingError::InvalidInput(format!(
                "task {} lists itself as a dependency",
                self.id
            )));
        }
        Ok(())
    }
}

impl TaskType {
    pub const ALL: [TaskType; 10] = [
        TaskType::Development,
        TaskType::BugFix,
        TaskType::Testing,
        TaskType::Documentation,
        TaskType::Research,
        TaskType::Deployment,
        TaskType::Maintenance,
        TaskType::Review,
        TaskType::Incident,
        TaskType::General,
    ];

    /// Map a free-form legacy type string onto the closed set
    pub fn from_legacy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "development" | "dev" | "feature" | "implementation" => TaskType::Development,
            "bug_fix" | "bugfix" | "bug" | "fix" | "hotfix" => TaskType::BugFix,
            "testing" | "test" | "qa" => TaskType::Testing,
            "documentation" | "docs" | "doc" => TaskType::Documentation,
            "research" | "investigation" | "spike" => TaskType::Research,
            "deployment" | "deploy" | "release" => TaskType::Deployment,
            "maintenance" | "chore" | "ops" | "refactor" => TaskType::Maintenance,
            "review" | "code_review" => TaskType::Review,
            "incident" | "outage" | "alert" => TaskType::Incident,
            _ => TaskType::General,
        }
    }

    /// Cold-start base duration in seconds, seeded from historical averages
    pub fn historical_base_seconds(&self) -> f64 {
        match self {
            TaskType::Development => 7200.0,
            TaskType::BugFix => 3600.0,
            TaskType::Testing => 2700.0,
            TaskType::Documentation => 1800.0,
            TaskType::Research => 5400.0,
            TaskType::Deployment => 1200.0,
            TaskType::Maintenance => 2400.0,
            TaskType::Review => 1200.0,
            TaskType::Incident => 1800.0,
            TaskType::General => 3600.0,
        }
    }
}

impl TaskPriority {
    /// Map a free-form legacy priority string; unknown values degrade to medium
    pub fn from_legacy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "urgent" | "p0" => TaskPriority::Critical,
            "high" | "p1" => TaskPriority::High,
            "low" | "p3" => TaskPriority::Low,
            "deferred" | "backlog" | "p4" => TaskPriority::Deferred,
            _ => TaskPriority::Medium,
        }
    }
}

impl From<String> for TaskPriority {
    fn from(value: String) -> Self {
        Self::from_legacy(&value)
    }
}

impl DependencyKind {
    /// Whether this kind imposes an ordering constraint
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, DependencyKind::Blocks | DependencyKind::Requires)
    }
}

impl Default for SchedulingConstraint {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 3,
            max_daily_hours: 8.0,
            working_hours_start: 9,
            working_hours_end: 17,
            respect_due_dates: true,
            allow_overtime: false,
            buffer_time_percent: 10.0,
        }
    }
}

impl SchedulingConstraint {
    /// Auto-correct what can be corrected and reject the rest
    pub fn normalized(&self, max_lanes: u32) -> Result<Self, SchedulingError> {
        if !self.buffer_time_percent.is_finite() || self.buffer_time_percent < 0.0 {
            return Err(SchedulingError::InvalidInput(format!(
                "buffer_time_percent must be a non-negative number, got {}",
                self.buffer_time_percent
            )));
        }
        if !self.max_daily_hours.is_finite() || self.max_daily_hours <= 0.0 {
            return Err(SchedulingError::InvalidInput(format!(
                "max_daily_hours must be positive, got {}",
                self.max_daily_hours
            )));
        }
        if self.working_hours_start > 24 || self.working_hours_end > 24 {
            return Err(SchedulingError::InvalidInput(format!(
                "working hours must lie within 0..=24, got {}..{}",
                self.working_hours_start, self.working_hours_end
            )));
        }
        if self.working_hours_start >= self.working_hours_end {
            return Err(SchedulingError::InvalidInput(format!(
                "working_hours_start ({}) must precede working_hours_end ({})",
                self.working_hours_start, self.working_hours_end
            )));
        }

        let window_hours = (self.working_hours_end - self.working_hours_start) as f64;
        Ok(Self {
            max_parallel_tasks: self.max_parallel_tasks.clamp(1, max_lanes.max(1)),
            max_daily_hours: self.max_daily_hours.min(window_hours),
            ..self.clone()
        })
    }
}

impl ScheduledTask {
    /// Whether the task finishes after its due date
    pub fn is_late(&self) -> bool {
        self.task
            .due_date
            .is_some_and(|due| self.scheduled_end > due)
    }
}

impl ScheduleMetrics {
    /// Metrics for a schedule with no tasks
    pub fn empty() -> Self {
        Self {
            total_span_seconds: 0.0,
            parallelization_factor: 0.0,
            deadline_compliance_ratio: 1.0,
            lanes_used: 0,
            late_task_ids: Vec::new(),
            cyclic_task_ids: Vec::new(),
            fallback_used: false,
            from_cache: false,
            utilization: None,
        }
    }
}
