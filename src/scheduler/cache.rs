use crate::task::types::*;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Previously computed schedule with the time it was produced
#[derive(Clone, Debug)]
struct CachedSchedule {
    computed_at: DateTime<Utc>,
    schedule: Schedule,
}

/// TTL cache of schedules keyed by a fingerprint of the pass inputs
pub struct ScheduleCache {
    ttl: Duration,
    entries: DashMap<String, CachedSchedule>,
}

impl ScheduleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Stable key over the task-id set, each task's revision and the constraints
    pub fn fingerprint(tasks: &[TaskEntry], constraints: &SchedulingConstraint) -> String {
        let mut revisions: Vec<String> = tasks
            .iter()
            .map(|task| format!("{}@{}", task.id, task.updated_at.timestamp_micros()))
            .collect();
        revisions.sort();

        let mut material = revisions.join("\n");
        material.push('\n');
        material.push_str(&serde_json::to_string(constraints).unwrap_or_default());

        Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes()).to_string()
    }

    /// Cached schedule for `key` if it is younger than the TTL at `now`
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Schedule> {
        let entry = self.entries.get(key)?;
        if now.signed_duration_since(entry.computed_at) < self.ttl {
            let mut schedule = entry.schedule.clone();
            schedule.metrics.from_cache = true;
            Some(schedule)
        } else {
            None
        }
    }

    /// Store a schedule and evict expired entries
    pub fn insert(&self, key: String, schedule: Schedule, now: DateTime<Utc>) {
        self.entries
            .retain(|_, cached| now.signed_duration_since(cached.computed_at) < self.ttl);
        self.entries.insert(
            key,
            CachedSchedule {
                computed_at: now,
                schedule,
            },
        );
        debug!("Schedule cache holds {} entries", self.entries.len());
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
