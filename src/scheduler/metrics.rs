use crate::task::types::*;
use chrono::Duration;
use std::collections::BTreeSet;

/// Compute span, parallelization and deadline compliance for a schedule.
///
/// The parallelization factor samples the number of active tasks every
/// `sample_interval` across the span and averages the counts.
pub fn compute_metrics(tasks: &[ScheduledTask], sample_interval: Duration) -> ScheduleMetrics {
    let mut metrics = ScheduleMetrics::empty();
    if tasks.is_empty() {
        return metrics;
    }

    let span_start = tasks.iter().map(|t| t.scheduled_start).min();
    let span_end = tasks.iter().map(|t| t.scheduled_end).max();
    if let (Some(span_start), Some(span_end)) = (span_start, span_end) {
        let span_seconds = span_end.signed_duration_since(span_start).num_seconds().max(0);
        metrics.total_span_seconds = span_seconds as f64;

        let step = sample_interval.num_seconds().max(1);
        let samples = ((span_seconds + step - 1) / step).max(1);

        // Count the sample points k*step that fall inside each task window
        let active: i64 = tasks
            .iter()
            .map(|task| {
                let start = task.scheduled_start.signed_duration_since(span_start).num_seconds();
                let end = task.scheduled_end.signed_duration_since(span_start).num_seconds();
                let first = div_ceil(start.max(0), step);
                let last = div_ceil(end.max(0), step).min(samples);
                (last - first).max(0)
            })
            .sum();

        metrics.parallelization_factor = active as f64 / samples as f64;
    }

    metrics.lanes_used = tasks
        .iter()
        .map(|t| t.lane_id)
        .collect::<BTreeSet<_>>()
        .len();

    let due_dated = tasks.iter().filter(|t| t.task.due_date.is_some()).count();
    metrics.late_task_ids = tasks
        .iter()
        .filter(|t| t.is_late())
        .map(|t| t.task.id.clone())
        .collect();
    metrics.deadline_compliance_ratio = if due_dated == 0 {
        1.0
    } else {
        (due_dated - metrics.late_task_ids.len()) as f64 / due_dated as f64
    };

    metrics
}

fn div_ceil(value: i64, step: i64) -> i64 {
    (value + step - 1) / step
}
