#[cfg(test)]
mod tests {
    use crate::scheduler::*;
    use crate::task::types::*;
    use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Monday morning, start of the default working window
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn create_optimizer() -> SchedulingOptimizer {
        let config = OptimizerConfig {
            worker_threads: Some(2),
            ..Default::default()
        };
        SchedulingOptimizer::new(
            config,
            Arc::new(DynamicPriorityEngine::default()),
            Arc::new(ExecutionTimePredictor::default()),
        )
    }

    /// Optimizer whose due-date urgency never outranks a static priority step
    fn create_calm_optimizer() -> SchedulingOptimizer {
        let weights = PriorityWeights {
            urgency_scale: 10.0,
            ..Default::default()
        };
        SchedulingOptimizer::new(
            OptimizerConfig {
                worker_threads: Some(2),
                ..Default::default()
            },
            Arc::new(DynamicPriorityEngine::new(weights)),
            Arc::new(ExecutionTimePredictor::default()),
        )
    }

    fn task(id: &str, priority: TaskPriority) -> TaskEntry {
        let mut task = TaskEntry::with_id(id, id, TaskType::General, priority);
        task.created_at = now();
        task.updated_at = now();
        task
    }

    fn around_the_clock(lanes: u32) -> SchedulingConstraint {
        SchedulingConstraint {
            max_parallel_tasks: lanes,
            allow_overtime: true,
            buffer_time_percent: 0.0,
            ..Default::default()
        }
    }

    fn by_id(schedule: &Schedule) -> HashMap<&str, &ScheduledTask> {
        schedule
            .tasks
            .iter()
            .map(|t| (t.task.id.as_str(), t))
            .collect()
    }

    fn position(schedule: &Schedule, id: &str) -> usize {
        schedule
            .tasks
            .iter()
            .position(|t| t.task.id == id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_chain_is_scheduled_in_dependency_order() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("C", TaskPriority::Critical).depends_on("B", DependencyKind::Blocks),
            task("B", TaskPriority::High).depends_on("A", DependencyKind::Requires),
            task("A", TaskPriority::Low),
        ];

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(3), now())
            .await
            .unwrap();

        assert_eq!(schedule.tasks.len(), 3);
        assert!(position(&schedule, "A") < position(&schedule, "B"));
        assert!(position(&schedule, "B") < position(&schedule, "C"));

        let placed = by_id(&schedule);
        assert!(placed["B"].scheduled_start >= placed["A"].scheduled_end);
        assert!(placed["C"].scheduled_start >= placed["B"].scheduled_end);
        assert!(schedule.tasks.iter().all(|t| t.dependencies_met));
        assert!(!schedule.metrics.fallback_used);
        assert!(schedule.metrics.cyclic_task_ids.is_empty());
    }

    #[tokio::test]
    async fn test_independent_tasks_spread_across_lanes() {
        let optimizer = create_optimizer();
        let tasks: Vec<TaskEntry> = (1..=5)
            .map(|i| task(&format!("T{}", i), TaskPriority::Critical))
            .collect();

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(2), now())
            .await
            .unwrap();

        assert_eq!(schedule.tasks.len(), 5);
        assert_eq!(schedule.metrics.lanes_used, 2);
        assert!(schedule.tasks.iter().all(|t| t.lane_id < 2));
        assert!(schedule.metrics.parallelization_factor > 1.5);
        assert!(schedule.metrics.parallelization_factor <= 2.0);

        // Lanes never double-book
        for a in &schedule.tasks {
            for b in &schedule.tasks {
                if a.task.id != b.task.id && a.lane_id == b.lane_id {
                    assert!(
                        a.scheduled_end <= b.scheduled_start || b.scheduled_end <= a.scheduled_start
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_equal_priorities_are_ordered_by_id() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("gamma", TaskPriority::Medium),
            task("alpha", TaskPriority::Medium),
            task("beta", TaskPriority::Medium),
        ];

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(1), now())
            .await
            .unwrap();

        let order: Vec<&str> = schedule.tasks.iter().map(|t| t.task.id.as_str()).collect();
        assert_eq!(order, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_overdue_task_is_flagged_late() {
        let optimizer = create_optimizer();
        let tasks = vec![task("overdue", TaskPriority::High).with_due_date(now() - Duration::hours(1))];

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(1), now())
            .await
            .unwrap();

        assert!(schedule.tasks[0].is_late());
        assert_eq!(schedule.metrics.late_task_ids, vec!["overdue".to_string()]);
        assert_eq!(schedule.metrics.deadline_compliance_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_overdue_task_is_kept_when_overtime_is_disabled() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("overdue", TaskPriority::High).with_due_date(now() - Duration::hours(1)),
            task("open", TaskPriority::Low).with_due_date(now() + Duration::days(3)),
        ];
        let constraints = SchedulingConstraint {
            respect_due_dates: true,
            allow_overtime: false,
            ..Default::default()
        };

        let schedule = optimizer
            .compute_schedule_at(tasks, &constraints, now())
            .await
            .unwrap();

        assert_eq!(schedule.tasks.len(), 2);
        assert!(!schedule.metrics.fallback_used);
        assert_eq!(schedule.metrics.late_task_ids, vec!["overdue".to_string()]);
        assert_eq!(schedule.metrics.deadline_compliance_ratio, 0.5);
    }

    /// A blocks B, so B leaves an idle gap at the start of lane 1 while it
    /// waits. C is short, due soon and ordered last.
    fn gap_scenario(c_due: DateTime<Utc>) -> (Vec<TaskEntry>, SchedulingConstraint) {
        let tasks = vec![
            task("A", TaskPriority::Critical),
            task("B", TaskPriority::High).depends_on("A", DependencyKind::Blocks),
            task("C", TaskPriority::Deferred)
                .with_estimate(60.0)
                .with_due_date(c_due),
        ];
        let constraints = SchedulingConstraint {
            max_parallel_tasks: 2,
            respect_due_dates: true,
            allow_overtime: false,
            buffer_time_percent: 0.0,
            ..Default::default()
        };
        (tasks, constraints)
    }

    #[tokio::test]
    async fn test_due_dated_task_is_pulled_into_idle_gap() {
        let optimizer = create_calm_optimizer();
        let due = now() + Duration::hours(1);
        let (tasks, constraints) = gap_scenario(due);

        let schedule = optimizer
            .compute_schedule_at(tasks, &constraints, now())
            .await
            .unwrap();
        let order: Vec<&str> = schedule.tasks.iter().map(|t| t.task.id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);

        let placed = by_id(&schedule);
        assert_eq!(placed["A"].lane_id, 0);
        assert_eq!(placed["B"].lane_id, 1);
        assert_eq!(placed["B"].scheduled_start, placed["A"].scheduled_end);

        // The regular placement would follow A on lane 0 and miss the due date
        assert_eq!(placed["C"].lane_id, 1);
        assert_eq!(placed["C"].scheduled_start, now());
        assert!(placed["C"].scheduled_end <= due);
        assert!(placed["C"].scheduled_end <= placed["B"].scheduled_start);
        assert!(schedule.metrics.late_task_ids.is_empty());
        assert_eq!(schedule.metrics.deadline_compliance_ratio, 1.0);
    }

    #[tokio::test]
    async fn test_overdue_task_is_not_pulled_into_idle_gap() {
        let optimizer = create_calm_optimizer();
        let (tasks, constraints) = gap_scenario(now() - Duration::hours(1));

        let schedule = optimizer
            .compute_schedule_at(tasks, &constraints, now())
            .await
            .unwrap();
        let placed = by_id(&schedule);

        assert_eq!(placed["C"].lane_id, 0);
        assert_eq!(placed["C"].scheduled_start, placed["A"].scheduled_end);
        assert_eq!(schedule.metrics.late_task_ids, vec!["C".to_string()]);
    }

    #[tokio::test]
    async fn test_self_dependent_task_is_still_scheduled() {
        let optimizer = create_optimizer();
        let tasks = vec![task("loop", TaskPriority::Medium).depends_on("loop", DependencyKind::Blocks)];
        assert!(tasks[0].validate().is_err());

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(1), now())
            .await
            .unwrap();

        assert_eq!(schedule.tasks.len(), 1);
        assert!(schedule.tasks[0].dependencies_met);
        assert!(schedule.metrics.cyclic_task_ids.is_empty());
        assert_eq!(schedule.tasks[0].scheduled_start, now());
    }

    #[tokio::test]
    async fn test_repeated_passes_keep_pending_predictions_bounded() {
        let predictor = Arc::new(ExecutionTimePredictor::new(PredictorConfig {
            max_pending: 50,
            ..Default::default()
        }));
        let optimizer = SchedulingOptimizer::new(
            OptimizerConfig::default(),
            Arc::new(DynamicPriorityEngine::default()),
            Arc::clone(&predictor),
        );

        for pass in 0..5 {
            let tasks: Vec<TaskEntry> = (0..40)
                .map(|i| task(&format!("pass{}-{}", pass, i), TaskPriority::Medium))
                .collect();
            optimizer
                .compute_schedule_at(tasks, &around_the_clock(4), now())
                .await
                .unwrap();
            assert!(predictor.pending_count() <= 50);
        }

        assert!(predictor.has_pending("pass4-0"));
        assert!(!predictor.has_pending("pass0-0"));
    }

    #[tokio::test]
    async fn test_cycle_is_broken_by_priority() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("A", TaskPriority::High).depends_on("B", DependencyKind::Blocks),
            task("B", TaskPriority::Low).depends_on("A", DependencyKind::Blocks),
        ];

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(2), now())
            .await
            .unwrap();

        let order: Vec<&str> = schedule.tasks.iter().map(|t| t.task.id.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
        assert_eq!(
            schedule.metrics.cyclic_task_ids,
            vec!["A".to_string(), "B".to_string()]
        );
        assert!(!schedule.metrics.fallback_used);
        assert!(!by_id(&schedule)["A"].dependencies_met);
    }

    #[tokio::test]
    async fn test_schedules_are_deterministic() {
        let tasks = vec![
            task("A", TaskPriority::Medium),
            task("B", TaskPriority::Medium).depends_on("A", DependencyKind::Blocks),
            task("C", TaskPriority::High),
            task("D", TaskPriority::Low).with_due_date(now() + Duration::hours(4)),
        ];
        let constraints = SchedulingConstraint::default();

        let first = create_optimizer()
            .compute_schedule_at(tasks.clone(), &constraints, now())
            .await
            .unwrap();
        let second = create_optimizer()
            .compute_schedule_at(tasks, &constraints, now())
            .await
            .unwrap();

        assert_eq!(first.tasks, second.tasks);
        assert_eq!(first.metrics, second.metrics);
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl_and_recompute_after() {
        let optimizer = create_optimizer();
        let tasks = vec![task("A", TaskPriority::Medium), task("B", TaskPriority::High)];
        let constraints = around_the_clock(2);

        let fresh = optimizer
            .compute_schedule_at(tasks.clone(), &constraints, now())
            .await
            .unwrap();
        assert!(!fresh.metrics.from_cache);

        let cached = optimizer
            .compute_schedule_at(tasks.clone(), &constraints, now() + Duration::minutes(5))
            .await
            .unwrap();
        assert!(cached.metrics.from_cache);
        assert_eq!(cached.tasks, fresh.tasks);

        let recomputed = optimizer
            .compute_schedule_at(tasks, &constraints, now() + Duration::minutes(16))
            .await
            .unwrap();
        assert!(!recomputed.metrics.from_cache);
    }

    #[tokio::test]
    async fn test_edited_task_bypasses_cache() {
        let optimizer = create_optimizer();
        let constraints = around_the_clock(1);
        let original = task("A", TaskPriority::Medium);

        optimizer
            .compute_schedule_at(vec![original.clone()], &constraints, now())
            .await
            .unwrap();

        let mut edited = original.with_estimate(600.0);
        edited.updated_at = now() + Duration::minutes(1);
        let schedule = optimizer
            .compute_schedule_at(vec![edited], &constraints, now() + Duration::minutes(2))
            .await
            .unwrap();

        assert!(!schedule.metrics.from_cache);
    }

    #[tokio::test]
    async fn test_unplaceable_work_falls_back() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("A", TaskPriority::Low),
            task("B", TaskPriority::Critical),
            task("C", TaskPriority::Medium),
        ];
        // Buffered durations exceed the calendar horizon
        let constraints = SchedulingConstraint {
            max_parallel_tasks: 2,
            buffer_time_percent: 1e7,
            ..Default::default()
        };

        let schedule = optimizer
            .compute_schedule_at(tasks.clone(), &constraints, now())
            .await
            .unwrap();

        assert!(schedule.metrics.fallback_used);
        let order: Vec<&str> = schedule.tasks.iter().map(|t| t.task.id.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
        let lanes: Vec<usize> = schedule.tasks.iter().map(|t| t.lane_id).collect();
        assert_eq!(lanes, vec![0, 1, 0]);

        // Fallback results are never cached
        let again = optimizer
            .compute_schedule_at(tasks, &constraints, now())
            .await
            .unwrap();
        assert!(!again.metrics.from_cache);
        assert!(optimizer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_constraints_are_rejected() {
        let optimizer = create_optimizer();
        let constraints = SchedulingConstraint {
            buffer_time_percent: -5.0,
            ..Default::default()
        };

        let err = optimizer
            .compute_schedule_at(vec![task("A", TaskPriority::Medium)], &constraints, now())
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulingError::InvalidInput(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_excess_lanes_are_clamped() {
        let optimizer = create_optimizer();
        let constraints = SchedulingConstraint {
            max_parallel_tasks: 0,
            allow_overtime: true,
            ..Default::default()
        };

        let schedule = optimizer
            .compute_schedule_at(
                vec![task("A", TaskPriority::Medium), task("B", TaskPriority::Medium)],
                &constraints,
                now(),
            )
            .await
            .unwrap();

        assert_eq!(schedule.metrics.lanes_used, 1);
    }

    #[tokio::test]
    async fn test_diamond_respects_working_hours() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("A", TaskPriority::Medium),
            task("B", TaskPriority::High).depends_on("A", DependencyKind::Blocks),
            task("C", TaskPriority::Low).depends_on("A", DependencyKind::Blocks),
            task("D", TaskPriority::Medium)
                .depends_on("B", DependencyKind::Blocks)
                .depends_on("C", DependencyKind::Requires),
        ];

        let schedule = optimizer
            .compute_schedule_at(tasks, &SchedulingConstraint::default(), now())
            .await
            .unwrap();
        let placed = by_id(&schedule);

        for scheduled in &schedule.tasks {
            for prerequisite in scheduled.task.prerequisite_ids() {
                assert!(scheduled.scheduled_start >= placed[prerequisite].scheduled_end);
            }
            let start = scheduled.scheduled_start;
            assert!(!matches!(start.weekday(), Weekday::Sat | Weekday::Sun));
            assert!((9..17).contains(&start.hour()));
        }
        assert!(!schedule.metrics.fallback_used);
    }

    #[tokio::test]
    async fn test_buffer_extends_booked_time_only() {
        let optimizer = create_optimizer();
        let constraints = SchedulingConstraint {
            buffer_time_percent: 50.0,
            allow_overtime: true,
            ..Default::default()
        };

        let schedule = optimizer
            .compute_schedule_at(vec![task("A", TaskPriority::Medium)], &constraints, now())
            .await
            .unwrap();
        let scheduled = &schedule.tasks[0];

        assert_eq!(scheduled.predicted_duration, 3600.0);
        assert_eq!(
            scheduled.scheduled_end - scheduled.scheduled_start,
            Duration::seconds(5400)
        );
    }

    #[tokio::test]
    async fn test_terminal_and_unknown_references_are_ignored() {
        let optimizer = create_optimizer();
        let tasks = vec![
            task("done", TaskPriority::Critical).with_status(TaskStatus::Completed),
            task("dropped", TaskPriority::Critical).with_status(TaskStatus::Cancelled),
            task("A", TaskPriority::Medium)
                .depends_on("done", DependencyKind::Blocks)
                .depends_on("ghost", DependencyKind::Blocks),
        ];

        let schedule = optimizer
            .compute_schedule_at(tasks, &around_the_clock(2), now())
            .await
            .unwrap();

        assert_eq!(schedule.tasks.len(), 1);
        assert_eq!(schedule.tasks[0].task.id, "A");
        assert!(schedule.tasks[0].dependencies_met);
        assert_eq!(schedule.tasks[0].scheduled_start, now());
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_schedule() {
        let optimizer = create_optimizer();
        let schedule = optimizer
            .compute_schedule_at(Vec::new(), &SchedulingConstraint::default(), now())
            .await
            .unwrap();

        assert!(schedule.tasks.is_empty());
        assert_eq!(schedule.metrics.deadline_compliance_ratio, 1.0);
        assert_eq!(schedule.metrics.total_span_seconds, 0.0);
    }
}
