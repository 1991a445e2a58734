//! Immutable per-tick view of device and process usage

use chrono::{DateTime, Utc};
use gpuslot_core::{DeviceState, GpuStatus};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::parser::StatusSample;
use crate::process_tree::{ancestors, ProcessTree};

/// Device and process usage observed in one sampling tick.
///
/// A snapshot is built in full and then published with a single swap, so
/// readers always see device memory, utilization and process usage from the
/// same tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSnapshot {
    /// Tick counter, 0 before the first successful sample
    pub tick: u64,
    /// When the sample was taken
    pub sampled_at: Option<DateTime<Utc>>,
    /// Per-device state keyed by device id
    pub devices: BTreeMap<u32, DeviceState>,
    /// GPU memory in MiB per pid, including usage rolled up from descendants
    pub process_memory: HashMap<u32, i64>,
}

impl MonitorSnapshot {
    /// Build a snapshot from a parsed sample.
    ///
    /// `totals` holds the first-seen total memory of every device and is
    /// extended with devices observed for the first time.
    pub fn build(
        tick: u64,
        sample: &StatusSample,
        totals: &mut HashMap<u32, i64>,
        tree: &dyn ProcessTree,
        max_ancestor_depth: usize,
    ) -> Self {
        let mut devices = BTreeMap::new();
        for id in 0..sample.device_count() {
            let device_id = id as u32;
            let (used, total) = match sample.memory.get(id) {
                Some(&(used, observed_total)) => {
                    (used, *totals.entry(device_id).or_insert(observed_total))
                }
                None => (0, totals.get(&device_id).copied().unwrap_or(0)),
            };
            let utilization = sample.utilization.get(id).copied().unwrap_or(0);
            devices.insert(device_id, DeviceState::new(total, used, utilization));
        }

        let mut process_memory: HashMap<u32, i64> = HashMap::new();
        for process in &sample.processes {
            *process_memory.entry(process.pid).or_insert(0) += process.memory_mib;
            for ancestor in ancestors(tree, process.pid, max_ancestor_depth) {
                *process_memory.entry(ancestor).or_insert(0) += process.memory_mib;
            }
        }

        Self {
            tick,
            sampled_at: Some(Utc::now()),
            devices,
            process_memory,
        }
    }

    /// Per-device status list ordered by device id
    pub fn gpu_statuses(&self) -> Vec<GpuStatus> {
        self.devices
            .iter()
            .map(|(id, state)| GpuStatus::new(*id, state.utilization, state.free_memory))
            .collect()
    }

    /// GPU memory in MiB attributed to `pid`; 0 if unknown
    pub fn process_memory_usage(&self, pid: u32) -> i64 {
        self.process_memory.get(&pid).copied().unwrap_or(0)
    }

    /// Used memory in MiB on `device_id`; 0 if unknown
    pub fn device_memory_usage(&self, device_id: u32) -> i64 {
        self.devices
            .get(&device_id)
            .map(|d| d.used_memory)
            .unwrap_or(0)
    }

    /// Utilization of `device_id`, if the device was observed
    pub fn utilization(&self, device_id: u32) -> Option<u32> {
        self.devices.get(&device_id).map(|d| d.utilization)
    }
}
