//! Adaptive execution-time prediction.
//!
//! Each [`TaskType`] owns one [`PredictionModel`] holding additive coefficients,
//! priority multipliers, a running historical average and a bounded history of
//! absolute percentage errors. Models live in a [`DashMap`]: feedback takes the
//! per-key write guard (single writer per type) while predictions compute under
//! the read guard, so every prediction sees a consistent snapshot.

use crate::task::types::*;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Tunables for the duration predictor
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictorConfig {
    /// Weight of the category historical average in the blend
    pub history_weight: f64,
    /// Weight of a caller-supplied estimate in the blend
    pub estimate_weight: f64,
    /// Relative step applied to coefficients on each feedback
    pub learning_rate: f64,
    pub mape_window: usize,
    pub min_interval_samples: usize,
    pub flat_margin: f64,
    pub z_score: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub default_seconds: f64,
    pub default_low_seconds: f64,
    pub default_high_seconds: f64,
    /// Pseudo-observations backing the seeded historical average
    pub prior_weight: f64,
    /// Hours a prediction waits for feedback before it is discarded
    pub pending_ttl_hours: i64,
    /// Upper bound on predictions awaiting feedback; the oldest are evicted first
    pub max_pending: usize,
}

/// Multipliers applied per static priority
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PriorityMultipliers {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub deferred: f64,
}

/// Learned model for a single task type
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionModel {
    pub task_type: TaskType,
    pub base_time: f64,
    /// Seconds added per prerequisite
    pub dependency_factor: f64,
    /// Seconds added per resource request
    pub resource_factor: f64,
    /// Seconds added per tag
    pub tag_factor: f64,
    pub priority_multipliers: PriorityMultipliers,
    pub historical_average: f64,
    pub observed_count: u64,
    /// Absolute percentage errors, oldest first
    pub mape_history: VecDeque<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Duration estimate with its confidence interval
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub seconds: f64,
    pub low: f64,
    pub high: f64,
    pub kind: IntervalKind,
    pub sample_count: usize,
}

/// What was predicted for a task, kept until feedback arrives
#[derive(Clone, Debug)]
struct PredictionRecord {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    task_type: TaskType,
    predicted_seconds: f64,
    dependency_count: usize,
    resource_count: usize,
}

/// Per-type adaptive duration predictor
pub struct ExecutionTimePredictor {
    config: PredictorConfig,
    models: DashMap<TaskType, PredictionModel>,
    pending: DashMap<TaskId, PredictionRecord>,
    next_sequence: AtomicU64,
}

impl ExecutionTimePredictor {
    /// Create a predictor with cold-start models for every task type
    pub fn new(config: PredictorConfig) -> Self {
        let models = DashMap::new();
        for task_type in TaskType::ALL {
            models.insert(task_type, PredictionModel::cold_start(task_type));
        }

        Self {
            config,
            models,
            pending: DashMap::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Predict the duration of `task`. Internal faults degrade to the safe default.
    pub fn predict_execution_time(&self, task: &TaskEntry) -> Prediction {
        let prediction = match self.try_predict(task) {
            Ok(prediction) => prediction,
            Err(err) => {
                warn!("Falling back to default duration for task {}: {}", task.id, err);
                self.default_prediction()
            }
        };

        self.pending.insert(
            task.id.clone(),
            PredictionRecord {
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                recorded_at: Utc::now(),
                task_type: task.task_type,
                predicted_seconds: prediction.seconds,
                dependency_count: task.prerequisite_ids().count(),
                resource_count: task.resource_requests.len(),
            },
        );
        if self.pending.len() > self.config.max_pending.max(1) {
            self.evict_oldest_pending();
        }

        prediction
    }

    /// Predict and express the result as a completion forecast from `now`
    pub fn predict_completion(
        &self,
        task: &TaskEntry,
        now: DateTime<Utc>,
    ) -> Result<PredictionResult, SchedulingError> {
        if task.id.trim().is_empty() {
            return Err(SchedulingError::InvalidInput(
                "task id must not be empty".to_string(),
            ));
        }

        let prediction = self.predict_execution_time(task);
        let estimated_completion = now
            .checked_add_signed(Duration::seconds(prediction.seconds.round() as i64))
            .unwrap_or(now);

        Ok(PredictionResult {
            task_id: task.id.clone(),
            task_type: task.task_type,
            predicted_seconds: prediction.seconds,
            low_seconds: prediction.low,
            high_seconds: prediction.high,
            interval_kind: prediction.kind,
            sample_count: prediction.sample_count,
            estimated_completion,
        })
    }

    fn try_predict(&self, task: &TaskEntry) -> Result<Prediction, SchedulingError> {
        let model = self.models.get(&task.task_type).ok_or_else(|| {
            SchedulingError::PredictionUnavailable(format!(
                "no model registered for {:?}",
                task.task_type
            ))
        })?;

        let dependency_count = task.prerequisite_ids().count() as f64;
        let resource_count = task.resource_requests.len() as f64;
        let tag_count = task.tags.len() as f64;

        let raw = (model.base_time
            + model.dependency_factor * dependency_count
            + model.resource_factor * resource_count
            + model.tag_factor * tag_count)
            * model.priority_multipliers.for_priority(task.priority);

        let history_weight = self.config.history_weight.clamp(0.0, 1.0);
        let mut blended = history_weight * model.historical_average + (1.0 - history_weight) * raw;

        if let Some(estimate) = task.estimated_seconds.filter(|e| e.is_finite() && *e > 0.0) {
            let estimate_weight = self.config.estimate_weight.clamp(0.0, 1.0);
            blended = (1.0 - estimate_weight) * blended + estimate_weight * estimate;
        }

        if !blended.is_finite() {
            return Err(SchedulingError::PredictionUnavailable(format!(
                "model for {:?} produced a non-finite estimate",
                task.task_type
            )));
        }

        let seconds = blended.clamp(self.config.min_seconds, self.config.max_seconds);
        let sample_count = model.mape_history.len();

        let (margin, kind) = if sample_count >= self.config.min_interval_samples.max(2) {
            let spread = std_dev(model.mape_history.iter().copied());
            (self.config.z_score * spread * seconds, IntervalKind::Statistical)
        } else {
            (self.config.flat_margin * seconds, IntervalKind::Flat)
        };

        if !margin.is_finite() {
            return Err(SchedulingError::PredictionUnavailable(format!(
                "error history for {:?} is corrupt",
                task.task_type
            )));
        }

        Ok(Prediction {
            seconds,
            low: (seconds - margin).max(self.config.min_seconds).min(seconds),
            high: (seconds + margin).min(self.config.max_seconds).max(seconds),
            kind,
            sample_count,
        })
    }

    fn default_prediction(&self) -> Prediction {
        Prediction {
            seconds: self.config.default_seconds,
            low: self.config.default_low_seconds,
            high: self.config.default_high_seconds,
            kind: IntervalKind::Default,
            sample_count: 0,
        }
    }

    /// Whether a prediction for `task_id` is awaiting feedback
    pub fn has_pending(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop predictions that have waited longer than `pending_ttl_hours` at `now`
    pub fn prune_pending(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = Duration::try_hours(self.config.pending_ttl_hours.max(0))
            .and_then(|ttl| now.checked_sub_signed(ttl))
        else {
            return 0;
        };

        let before = self.pending.len();
        self.pending.retain(|_, record| record.recorded_at >= cutoff);
        let removed = before.saturating_sub(self.pending.len());
        if removed > 0 {
            debug!("Discarded {} predictions that never received feedback", removed);
        }
        removed
    }

    /// Trim the pending map to 90% of its cap, oldest predictions first
    fn evict_oldest_pending(&self) {
        let cap = self.config.max_pending.max(1);
        let target = (cap - cap / 10).max(1);

        let mut ages: Vec<(u64, TaskId)> = self
            .pending
            .iter()
            .map(|entry| (entry.value().sequence, entry.key().clone()))
            .collect();
        if ages.len() <= target {
            return;
        }
        ages.sort_unstable_by_key(|(sequence, _)| *sequence);

        let surplus = ages.len() - target;
        for (_, task_id) in ages.into_iter().take(surplus) {
            self.pending.remove(&task_id);
        }
        debug!("Evicted {} pending predictions over the cap of {}", surplus, cap);
    }

    /// Record the observed duration of a previously predicted task
    pub fn update_prediction(&self, task_id: &str, actual_seconds: f64) -> Result<(), SchedulingError> {
        if !actual_seconds.is_finite() || actual_seconds <= 0.0 {
            return Err(SchedulingError::InvalidInput(format!(
                "actual duration must be a positive number of seconds, got {}",
                actual_seconds
            )));
        }

        let (_, record) = self.pending.remove(task_id).ok_or_else(|| {
            SchedulingError::InvalidInput(format!("no prediction on record for task {}", task_id))
        })?;

        let mut model = self
            .models
            .entry(record.task_type)
            .or_insert_with(|| PredictionModel::cold_start(record.task_type));

        let error = actual_seconds - record.predicted_seconds;
        model.mape_history.push_back(error.abs() / actual_seconds);
        while model.mape_history.len() > self.config.mape_window.max(1) {
            model.mape_history.pop_front();
        }

        // Nudge only the coefficients that contributed to this prediction
        let direction = error.signum();
        let step = 1.0 + self.config.learning_rate * direction;
        if record.dependency_count > 0 {
            model.dependency_factor = (model.dependency_factor * step).max(0.0);
        }
        if record.resource_count > 0 {
            model.resource_factor = (model.resource_factor * step).max(0.0);
        }

        model.observed_count += 1;
        let weight = self.config.prior_weight.max(0.0) + model.observed_count as f64;
        model.historical_average += (actual_seconds - model.historical_average) / weight;
        model.updated_at = Utc::now();

        debug!(
            "Updated {:?} model from task {}: predicted {:.0}s, actual {:.0}s, {} error samples",
            record.task_type,
            task_id,
            record.predicted_seconds,
            actual_seconds,
            model.mape_history.len()
        );

        Ok(())
    }

    /// Snapshot of one type's model
    pub fn model(&self, task_type: TaskType) -> Option<PredictionModel> {
        self.models.get(&task_type).map(|model| model.clone())
    }

    /// Snapshot of every model, ordered by task type
    pub fn export_models(&self) -> Vec<PredictionModel> {
        let mut models: Vec<PredictionModel> =
            self.models.iter().map(|entry| entry.value().clone()).collect();
        models.sort_by_key(|model| model.task_type);
        models
    }

    /// Replace models with previously checkpointed ones
    pub fn import_models(&self, models: Vec<PredictionModel>) {
        for mut model in models {
            while model.mape_history.len() > self.config.mape_window.max(1) {
                model.mape_history.pop_front();
            }
            self.models.insert(model.task_type, model);
        }
    }
}

impl Default for ExecutionTimePredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

impl PredictionModel {
    /// Cold-start model seeded from the type's historical average
    pub fn cold_start(task_type: TaskType) -> Self {
        let base_time = task_type.historical_base_seconds();
        Self {
            task_type,
            base_time,
            dependency_factor: 300.0,
            resource_factor: 120.0,
            tag_factor: 60.0,
            priority_multipliers: PriorityMultipliers::default(),
            historical_average: base_time,
            observed_count: 0,
            mape_history: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    /// Mean absolute percentage error over the rolling window
    pub fn mape(&self) -> Option<f64> {
        if self.mape_history.is_empty() {
            None
        } else {
            Some(self.mape_history.iter().sum::<f64>() / self.mape_history.len() as f64)
        }
    }
}

impl PriorityMultipliers {
    pub fn for_priority(&self, priority: TaskPriority) -> f64 {
        match priority {
            TaskPriority::Critical => self.critical,
            TaskPriority::High => self.high,
            TaskPriority::Medium => self.medium,
            TaskPriority::Low => self.low,
            TaskPriority::Deferred => self.deferred,
        }
    }
}

impl Default for PriorityMultipliers {
    fn default() -> Self {
        Self {
            critical: 0.8,
            high: 0.9,
            medium: 1.0,
            low: 1.1,
            deferred: 1.2,
        }
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_weight: 0.7,
            estimate_weight: 0.3,
            learning_rate: 0.01,
            mape_window: 100,
            min_interval_samples: 5,
            flat_margin: 0.3,
            z_score: 1.96,
            min_seconds: 60.0,
            max_seconds: 86_400.0,
            default_seconds: 600.0,
            default_low_seconds: 300.0,
            default_high_seconds: 1800.0,
            prior_weight: 5.0,
            pending_ttl_hours: 168,
            max_pending: 10_000,
        }
    }
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count();
    if count < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general_task(id: &str) -> TaskEntry {
        TaskEntry::with_id(id, "task", TaskType::General, TaskPriority::Medium)
    }

    #[test]
    fn test_cold_start_prediction_uses_flat_margin() {
        let predictor = ExecutionTimePredictor::default();
        let prediction = predictor.predict_execution_time(&general_task("a"));

        assert_eq!(prediction.seconds, 3600.0);
        assert_eq!(prediction.kind, IntervalKind::Flat);
        assert!((prediction.low - 2520.0).abs() < 1e-6);
        assert!((prediction.high - 4680.0).abs() < 1e-6);
    }

    #[test]
    fn test_features_and_priority_shift_the_estimate() {
        let predictor = ExecutionTimePredictor::default();
        let plain = predictor.predict_execution_time(&general_task("plain"));

        let heavy = general_task("heavy")
            .depends_on("x", DependencyKind::Blocks)
            .with_resource("gpu", 1.0)
            .with_tag("infra");
        let heavy = predictor.predict_execution_time(&heavy);
        // raw = 3600 + 300 + 120 + 60; blended with weight 0.3
        assert!((heavy.seconds - (plain.seconds + 0.3 * 480.0)).abs() < 1e-6);

        let mut urgent = general_task("urgent");
        urgent.priority = TaskPriority::Critical;
        let urgent = predictor.predict_execution_time(&urgent);
        assert!(urgent.seconds < plain.seconds);
    }

    #[test]
    fn test_caller_estimate_is_blended() {
        let predictor = ExecutionTimePredictor::default();
        let task = general_task("est").with_estimate(600.0);
        let prediction = predictor.predict_execution_time(&task);
        assert!((prediction.seconds - (0.7 * 3600.0 + 0.3 * 600.0)).abs() < 1e-6);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let predictor = ExecutionTimePredictor::default();
        let mut tiny = general_task("tiny");
        tiny.task_type = TaskType::Review;
        tiny.priority = TaskPriority::Critical;
        let mut model = PredictionModel::cold_start(TaskType::Review);
        model.base_time = 1.0;
        model.historical_average = 1.0;
        predictor.import_models(vec![model]);

        let prediction = predictor.predict_execution_time(&tiny);
        assert_eq!(prediction.seconds, 60.0);
        assert!(prediction.low <= prediction.seconds && prediction.seconds <= prediction.high);
    }

    #[test]
    fn test_corrupt_model_falls_back_to_default() {
        let predictor = ExecutionTimePredictor::default();
        let mut model = PredictionModel::cold_start(TaskType::General);
        model.base_time = f64::NAN;
        predictor.import_models(vec![model]);

        let prediction = predictor.predict_execution_time(&general_task("broken"));
        assert_eq!(prediction.seconds, 600.0);
        assert_eq!(prediction.low, 300.0);
        assert_eq!(prediction.high, 1800.0);
        assert_eq!(prediction.kind, IntervalKind::Default);
    }

    #[test]
    fn test_update_requires_prior_prediction_and_positive_actual() {
        let predictor = ExecutionTimePredictor::default();
        assert!(predictor.update_prediction("unknown", 100.0).is_err());

        predictor.predict_execution_time(&general_task("a"));
        assert!(predictor.has_pending("a"));
        assert!(predictor.update_prediction("a", -1.0).is_err());
        assert!(predictor.update_prediction("a", f64::NAN).is_err());
        assert!(predictor.update_prediction("a", 4000.0).is_ok());
        assert!(!predictor.has_pending("a"));
    }

    #[test]
    fn test_pending_predictions_are_capped_oldest_first() {
        let config = PredictorConfig {
            max_pending: 50,
            ..Default::default()
        };
        let predictor = ExecutionTimePredictor::new(config);
        for pass in 0..5 {
            for i in 0..40 {
                predictor.predict_execution_time(&general_task(&format!("p{}-{}", pass, i)));
            }
        }

        assert!(predictor.pending_count() <= 50);
        assert!(!predictor.has_pending("p0-0"));
        assert!(predictor.has_pending("p4-39"));
        assert!(predictor.update_prediction("p4-39", 1200.0).is_ok());
    }

    #[test]
    fn test_stale_pending_predictions_are_pruned() {
        let predictor = ExecutionTimePredictor::default();
        predictor.predict_execution_time(&general_task("a"));
        predictor.predict_execution_time(&general_task("b"));

        assert_eq!(predictor.prune_pending(Utc::now()), 0);
        assert_eq!(predictor.pending_count(), 2);

        assert_eq!(predictor.prune_pending(Utc::now() + Duration::hours(169)), 2);
        assert_eq!(predictor.pending_count(), 0);
        assert!(predictor.update_prediction("a", 600.0).is_err());
    }

    #[test]
    fn test_statistical_interval_after_enough_samples() {
        let predictor = ExecutionTimePredictor::default();
        for (i, actual) in [3000.0, 4000.0, 3500.0, 5000.0, 2500.0].iter().enumerate() {
            let id = format!("t{}", i);
            predictor.predict_execution_time(&general_task(&id));
            predictor.update_prediction(&id, *actual).unwrap();
        }

        let prediction = predictor.predict_execution_time(&general_task("next"));
        assert_eq!(prediction.kind, IntervalKind::Statistical);
        assert_eq!(prediction.sample_count, 5);
        assert!(prediction.low <= prediction.seconds && prediction.seconds <= prediction.high);
    }

    #[test]
    fn test_mape_history_is_bounded() {
        let config = PredictorConfig {
            mape_window: 10,
            ..Default::default()
        };
        let predictor = ExecutionTimePredictor::new(config);
        for i in 0..25 {
            let id = format!("t{}", i);
            predictor.predict_execution_time(&general_task(&id));
            predictor.update_prediction(&id, 1800.0).unwrap();
        }

        let model = predictor.model(TaskType::General).unwrap();
        assert_eq!(model.mape_history.len(), 10);
        assert_eq!(model.observed_count, 25);
    }

    #[test]
    fn test_coefficients_move_toward_observed_error() {
        let predictor = ExecutionTimePredictor::default();
        let task = general_task("dep")
            .depends_on("x", DependencyKind::Requires)
            .with_resource("db", 1.0);
        predictor.predict_execution_time(&task);
        predictor.update_prediction("dep", 20_000.0).unwrap();

        let model = predictor.model(TaskType::General).unwrap();
        assert!((model.dependency_factor - 303.0).abs() < 1e-9);
        assert!((model.resource_factor - 121.2).abs() < 1e-9);
        assert_eq!(model.tag_factor, 60.0);
    }

    #[test]
    fn test_predictions_converge_toward_observed_mean() {
        let predictor = ExecutionTimePredictor::default();
        let observed = 5000.0;
        let mut last_distance = f64::MAX;

        for i in 0..40 {
            let id = format!("run{}", i);
            let prediction = predictor.predict_execution_time(&general_task(&id));
            if i >= 20 {
                let distance = (observed - prediction.seconds).abs();
                assert!(distance <= last_distance);
                last_distance = distance;
            }
            predictor.update_prediction(&id, observed).unwrap();
        }

        assert!(last_distance < (observed - 3600.0));
    }

    #[test]
    fn test_predict_completion() {
        let predictor = ExecutionTimePredictor::default();
        let now = Utc::now();
        let result = predictor.predict_completion(&general_task("c"), now).unwrap();

        assert_eq!(result.task_id, "c");
        assert_eq!(result.estimated_completion, now + Duration::seconds(3600));

        let blank = TaskEntry::with_id("", "blank", TaskType::General, TaskPriority::Low);
        assert!(predictor.predict_completion(&blank, now).is_err());
    }
}
