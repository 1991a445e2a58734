//! GPU device records and the device-selection heuristic

use serde::{Deserialize, Serialize};

/// Live state of one GPU device. Memory figures are in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Total memory, captured on first observation
    pub total_memory: i64,
    /// Memory in use
    pub used_memory: i64,
    /// `total_memory - used_memory`
    pub free_memory: i64,
    /// Current utilization percentage (0-100)
    pub utilization: u32,
}

impl DeviceState {
    /// Create a device state; free memory is derived and utilization clamped to 100
    pub fn new(total_memory: i64, used_memory: i64, utilization: u32) -> Self {
        Self {
            total_memory,
            used_memory,
            free_memory: total_memory - used_memory,
            utilization: utilization.min(100),
        }
    }
}

/// Snapshot entry consumed by placement and fairness callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuStatus {
    /// Device index, assigned by observation order
    pub device_id: u32,
    /// Current utilization percentage (0-100)
    pub utilization: u32,
    /// Free memory in MiB
    pub free_memory: i64,
}

impl GpuStatus {
    pub fn new(device_id: u32, utilization: u32, free_memory: i64) -> Self {
        Self {
            device_id,
            utilization,
            free_memory,
        }
    }
}

impl std::fmt::Display for GpuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GPU {} ({}% busy, {} MiB free)",
            self.device_id, self.utilization, self.free_memory
        )
    }
}

/// Estimated GPU utilization attributed to an application on one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuApplicationHistory {
    /// Device index
    pub device_id: u32,
    /// Application identifier
    pub application_id: String,
    /// Estimated utilization contribution in percentage points
    pub gpu_utilization: u32,
    /// Containers of this application still being monitored
    pub active_containers: usize,
}

impl GpuApplicationHistory {
    /// Whether the application still has monitored containers
    pub fn is_active(&self) -> bool {
        self.active_containers > 0
    }
}

/// Pick a device for a container needing `required_gpu_memory` MiB.
///
/// Among devices with enough free memory the least utilized one wins, ties
/// going to the lowest device id. When nothing fits, the least utilized
/// device overall is returned anyway; callers that must detect a misfit
/// have to check `free_memory` themselves. `None` only for an empty list.
pub fn select_device(statuses: &[GpuStatus], required_gpu_memory: i64) -> Option<u32> {
    least_utilized(
        statuses
            .iter()
            .filter(|s| s.free_memory >= required_gpu_memory),
    )
    .or_else(|| least_utilized(statuses.iter()))
}

fn least_utilized<'a>(candidates: impl Iterator<Item = &'a GpuStatus>) -> Option<u32> {
    candidates
        .min_by_key(|s| (s.utilization, s.device_id))
        .map(|s| s.device_id)
}

/// Lowest utilization across devices; 100 when there are none
pub fn min_gpu_utilization(statuses: &[GpuStatus]) -> u32 {
    statuses
        .iter()
        .map(|s| s.utilization)
        .min()
        .unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_state_free_memory() {
        let state = DeviceState::new(15109, 4096, 140);
        assert_eq!(state.free_memory, 11013);
        assert_eq!(state.utilization, 100);
    }

    #[test]
    fn test_select_prefers_fit_over_utilization() {
        let statuses = vec![GpuStatus::new(0, 80, 100), GpuStatus::new(1, 10, 50)];
        assert_eq!(select_device(&statuses, 60), Some(0));
    }

    #[test]
    fn test_select_lowest_utilization_among_fits() {
        let statuses = vec![
            GpuStatus::new(0, 50, 1000),
            GpuStatus::new(1, 20, 1000),
            GpuStatus::new(2, 20, 1000),
        ];
        assert_eq!(select_device(&statuses, 500), Some(1));
    }

    #[test]
    fn test_select_degrades_to_best_effort() {
        let statuses = vec![GpuStatus::new(0, 70, 10), GpuStatus::new(1, 30, 20)];
        assert_eq!(select_device(&statuses, 4096), Some(1));
        assert_eq!(select_device(&[], 0), None);
    }

    #[test]
    fn test_min_gpu_utilization() {
        let statuses = vec![GpuStatus::new(0, 70, 10), GpuStatus::new(1, 30, 20)];
        assert_eq!(min_gpu_utilization(&statuses), 30);
        assert_eq!(min_gpu_utilization(&[]), 100);
    }

    #[test]
    fn test_history_is_active() {
        let history = GpuApplicationHistory {
            device_id: 0,
            application_id: "application_1_0001".to_string(),
            gpu_utilization: 12,
            active_containers: 0,
        };
        assert!(!history.is_active());
    }

    #[test]
    fn test_gpu_status_display() {
        assert_eq!(
            GpuStatus::new(1, 30, 20).to_string(),
            "GPU 1 (30% busy, 20 MiB free)"
        );
    }
}
