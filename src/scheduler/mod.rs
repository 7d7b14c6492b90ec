pub mod cache;
pub mod calendar;
pub mod graph;
pub mod lanes;
pub mod metrics;
pub mod optimizer;
pub mod predictor;
pub mod priority;

#[cfg(test)]
mod tests;

pub use cache::ScheduleCache;
pub use calendar::{MAX_CALENDAR_DAYS, WorkingCalendar};
pub use graph::{DependencyGraph, TopologicalOrder};
pub use lanes::{LanePool, Placement};
pub use metrics::compute_metrics;
pub use optimizer::{OptimizerConfig, SchedulingOptimizer};
pub use predictor::{ExecutionTimePredictor, Prediction, PredictionModel, PredictorConfig};
pub use priority::{DynamicPriorityEngine, PriorityWeights};
