use crate::scheduler::calendar::WorkingCalendar;
use crate::task::types::SchedulingError;
use chrono::{DateTime, Utc};

/// One parallel execution timeline
#[derive(Clone, Debug)]
pub struct Lane {
    pub id: usize,
    pub available_at: DateTime<Utc>,
    /// Booked intervals, sorted by start
    busy: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Where a task was placed
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub lane_id: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Fixed set of lanes sharing one working calendar
#[derive(Clone, Debug)]
pub struct LanePool {
    lanes: Vec<Lane>,
    calendar: WorkingCalendar,
}

impl LanePool {
    pub fn new(count: usize, origin: DateTime<Utc>, calendar: WorkingCalendar) -> Self {
        let lanes = (0..count.max(1))
            .map(|id| Lane {
                id,
                available_at: origin,
                busy: Vec::new(),
            })
            .collect();
        Self { lanes, calendar }
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Lane that frees up first; ties go to the lowest id
    pub fn earliest_lane(&self) -> usize {
        self.lanes
            .iter()
            .min_by_key(|lane| (lane.available_at, lane.id))
            .map_or(0, |lane| lane.id)
    }

    /// Place `seconds` of work on `lane_id` no earlier than `floor`
    pub fn place(
        &self,
        lane_id: usize,
        floor: DateTime<Utc>,
        seconds: i64,
    ) -> Result<Placement, SchedulingError> {
        let lane = self.lanes.get(lane_id).ok_or_else(|| {
            SchedulingError::SchedulingFailure(format!("lane {} does not exist", lane_id))
        })?;

        let start = self.calendar.snap_forward(lane.available_at.max(floor))?;
        let end = self.calendar.add_working_time(start, seconds)?;
        Ok(Placement {
            lane_id,
            start,
            end,
        })
    }

    /// Search idle gaps on every lane for the earliest-finishing slot at or after `floor`
    pub fn best_backfill(
        &self,
        floor: DateTime<Utc>,
        seconds: i64,
    ) -> Result<Option<Placement>, SchedulingError> {
        let mut best: Option<Placement> = None;

        for lane in &self.lanes {
            let candidates = std::iter::once(floor).chain(
                lane.busy
                    .iter()
                    .map(|(_, end)| *end)
                    .filter(|end| *end >= floor),
            );

            for candidate in candidates {
                let start = self.calendar.snap_forward(candidate)?;
                let end = self.calendar.add_working_time(start, seconds)?;
                let overlaps = lane
                    .busy
                    .iter()
                    .any(|(busy_start, busy_end)| start < *busy_end && *busy_start < end);
                if overlaps {
                    continue;
                }

                if best.as_ref().is_none_or(|current| end < current.end) {
                    best = Some(Placement {
                        lane_id: lane.id,
                        start,
                        end,
                    });
                }
                break;
            }
        }

        Ok(best)
    }

    /// Book a placement on its lane
    pub fn commit(&mut self, placement: &Placement) {
        if let Some(lane) = self.lanes.get_mut(placement.lane_id) {
            let index = lane
                .busy
                .partition_point(|(start, _)| *start <= placement.start);
            lane.busy.insert(index, (placement.start, placement.end));
            lane.available_at = lane.available_at.max(placement.end);
        }
    }

    /// Number of lanes with at least one booking
    pub fn lanes_used(&self) -> usize {
        self.lanes.iter().filter(|lane| !lane.busy.is_empty()).count()
    }
}
