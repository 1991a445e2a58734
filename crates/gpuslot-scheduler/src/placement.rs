//! GPU device placement decisions

use gpuslot_core::{select_device, GpuStatus, GpuslotError, GpuslotResult, Resource};
use tracing::debug;

/// Placement decision for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementDecision {
    /// Chosen device
    pub device_id: u32,
    /// Whether the device had enough free memory when chosen
    pub fits: bool,
}

/// Strategy for choosing a GPU device
pub trait PlacementStrategy: Send + Sync {
    /// Choose a device for `request` given the live device statuses
    fn place(&self, devices: &[GpuStatus], request: &Resource) -> GpuslotResult<PlacementDecision>;
}

/// Picks the least utilized device with enough free GPU memory.
///
/// In best-effort mode a request that fits nowhere still lands on the least
/// utilized device and the decision is marked as not fitting. Strict mode
/// rejects such requests instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastUtilizedPlacement {
    strict: bool,
}

impl LeastUtilizedPlacement {
    /// Best-effort placement
    pub fn best_effort() -> Self {
        Self { strict: false }
    }

    /// Placement that fails when no device has enough free memory
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl PlacementStrategy for LeastUtilizedPlacement {
    fn place(&self, devices: &[GpuStatus], request: &Resource) -> GpuslotResult<PlacementDecision> {
        let required = request.gpu_memory;
        let device_id = select_device(devices, required).ok_or_else(|| {
            GpuslotError::ResourceExhausted("No GPU devices observed".to_string())
        })?;

        let fits = devices
            .iter()
            .find(|d| d.device_id == device_id)
            .map_or(false, |d| d.free_memory >= required);

        if !fits && self.strict {
            return Err(GpuslotError::ResourceExhausted(format!(
                "No GPU has {} MiB free",
                required
            )));
        }

        debug!(device = device_id, required = required, fits = fits, "Placed on GPU");
        Ok(PlacementDecision { device_id, fits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<GpuStatus> {
        vec![GpuStatus::new(0, 80, 100), GpuStatus::new(1, 10, 50)]
    }

    #[test]
    fn test_fit_takes_precedence_over_utilization() {
        let decision = LeastUtilizedPlacement::best_effort()
            .place(&devices(), &Resource::with_memory(1024, 60))
            .unwrap();
        assert_eq!(decision, PlacementDecision { device_id: 0, fits: true });
    }

    #[test]
    fn test_least_utilized_among_fitting() {
        let decision = LeastUtilizedPlacement::strict()
            .place(&devices(), &Resource::with_memory(1024, 40))
            .unwrap();
        assert_eq!(decision.device_id, 1);
        assert!(decision.fits);
    }

    #[test]
    fn test_best_effort_when_nothing_fits() {
        let decision = LeastUtilizedPlacement::best_effort()
            .place(&devices(), &Resource::with_memory(1024, 4096))
            .unwrap();
        assert_eq!(decision, PlacementDecision { device_id: 1, fits: false });
    }

    #[test]
    fn test_strict_rejects_when_nothing_fits() {
        let err = LeastUtilizedPlacement::strict()
            .place(&devices(), &Resource::with_memory(1024, 4096))
            .unwrap_err();
        assert!(matches!(err, GpuslotError::ResourceExhausted(_)));
    }

    #[test]
    fn test_no_devices() {
        let result = LeastUtilizedPlacement::best_effort().place(&[], &Resource::NONE);
        assert!(result.is_err());
    }
}
