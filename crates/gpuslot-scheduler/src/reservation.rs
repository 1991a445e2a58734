//! Reservation records

use gpuslot_core::{GpuslotError, GpuslotResult, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::curve::ResourceCurve;

/// Unique reservation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ReservationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reservation_{}", self.0.simple())
    }
}

/// Half-open time interval `[start, end)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationInterval {
    pub start: i64,
    pub end: i64,
}

impl ReservationInterval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: i64) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Lifecycle of an admitted reservation relative to a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    /// Accepted, not started yet
    Admitted,
    /// Inside its time window
    Active,
    /// Past its end time, eligible for archiving
    Completed,
}

/// A user's request for resources over time in one queue
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationAllocation {
    pub id: ReservationId,
    pub user: String,
    pub queue_name: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Resources requested per interval; overlapping intervals add up
    pub allocations: BTreeMap<ReservationInterval, Resource>,
}

impl ReservationAllocation {
    /// Create a new allocation
    pub fn new(
        id: ReservationId,
        user: impl Into<String>,
        queue_name: impl Into<String>,
        start_time: i64,
        end_time: i64,
        allocations: BTreeMap<ReservationInterval, Resource>,
    ) -> Self {
        Self {
            id,
            user: user.into(),
            queue_name: queue_name.into(),
            start_time,
            end_time,
            allocations,
        }
    }

    /// Back-to-back intervals of `step` starting at `start`, one per demand
    pub fn steps(start: i64, step: i64, demands: &[Resource]) -> BTreeMap<ReservationInterval, Resource> {
        demands
            .iter()
            .enumerate()
            .map(|(i, demand)| {
                let from = start + i as i64 * step;
                (ReservationInterval::new(from, from + step), *demand)
            })
            .collect()
    }

    /// Check time bounds and interval shapes
    pub fn validate(&self) -> GpuslotResult<()> {
        if self.user.is_empty() {
            return Err(GpuslotError::InvalidReservation(format!(
                "{} has no user",
                self.id
            )));
        }
        if self.start_time >= self.end_time {
            return Err(GpuslotError::InvalidReservation(format!(
                "{} starts at {} but ends at {}",
                self.id, self.start_time, self.end_time
            )));
        }
        for (interval, resource) in &self.allocations {
            if interval.start >= interval.end {
                return Err(GpuslotError::InvalidReservation(format!(
                    "{} has an empty interval [{}, {})",
                    self.id, interval.start, interval.end
                )));
            }
            if interval.start < self.start_time || interval.end > self.end_time {
                return Err(GpuslotError::InvalidReservation(format!(
                    "{} interval [{}, {}) lies outside [{}, {})",
                    self.id, interval.start, interval.end, self.start_time, self.end_time
                )));
            }
            if resource.memory < 0 || resource.vcores < 0 || resource.gpu_memory < 0 {
                return Err(GpuslotError::InvalidReservation(format!(
                    "{} requests negative resources {}",
                    self.id, resource
                )));
            }
        }
        Ok(())
    }

    /// Demand sampled at `step`
    pub fn curve(&self, step: i64) -> ResourceCurve {
        ResourceCurve::from_intervals(
            step,
            self.allocations
                .iter()
                .map(|(interval, resource)| (interval.start, interval.end, *resource)),
        )
    }

    /// Exact demand at `instant`
    pub fn resources_at(&self, instant: i64) -> Resource {
        self.allocations
            .iter()
            .filter(|(interval, _)| interval.contains(instant))
            .map(|(_, resource)| *resource)
            .sum()
    }

    /// Whether `instant` falls inside the reservation window
    pub fn is_active(&self, instant: i64) -> bool {
        self.start_time <= instant && instant < self.end_time
    }

    /// State of the reservation at `now`
    pub fn state_at(&self, now: i64) -> ReservationState {
        if now < self.start_time {
            ReservationState::Admitted
        } else if now < self.end_time {
            ReservationState::Active
        } else {
            ReservationState::Completed
        }
    }
}
