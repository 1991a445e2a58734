//! Per-application GPU utilization attribution
//!
//! The estimate is a heuristic: while an application has monitored
//! containers on a device, the spread between the utilization seen when it
//! started and the highest utilization seen since is divided among its
//! containers. It is not a precise per-process measurement.

use gpuslot_core::GpuApplicationHistory;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Clone)]
struct Attribution {
    containers: HashSet<String>,
    min_utilization: u32,
    max_utilization: u32,
}

impl Attribution {
    fn spread(&self) -> u32 {
        self.max_utilization.saturating_sub(self.min_utilization)
    }
}

#[derive(Debug, Clone)]
struct Finished {
    device_id: u32,
    application_id: String,
    spread: u32,
}

/// Tracks which applications are being monitored on which device
#[derive(Debug)]
pub struct ApplicationTracker {
    active: HashMap<(u32, String), Attribution>,
    finished: VecDeque<Finished>,
    history_capacity: usize,
}

impl ApplicationTracker {
    /// Create a tracker that keeps up to `history_capacity` finished applications
    pub fn new(history_capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            finished: VecDeque::new(),
            history_capacity,
        }
    }

    /// Start monitoring `container_id` of `application_id` on `device_id`.
    ///
    /// The first container of an application seeds both the running minimum
    /// and maximum with `current_utilization`. Returns the active container count.
    pub fn start(
        &mut self,
        device_id: u32,
        application_id: &str,
        container_id: &str,
        current_utilization: u32,
    ) -> usize {
        let key = (device_id, application_id.to_string());
        let attribution = self.active.entry(key).or_insert_with(|| {
            debug!(
                device = device_id,
                application = %application_id,
                utilization = current_utilization,
                "Application activated"
            );
            Attribution {
                containers: HashSet::new(),
                min_utilization: current_utilization,
                max_utilization: current_utilization,
            }
        });
        attribution.containers.insert(container_id.to_string());
        let count = attribution.containers.len();

        self.finished
            .retain(|f| !(f.device_id == device_id && f.application_id == application_id));
        count
    }

    /// Stop monitoring a container. Unknown containers are ignored.
    ///
    /// When the last container of an application stops, its statistics move
    /// to the finished history. Returns whether anything changed.
    pub fn stop(&mut self, device_id: u32, application_id: &str, container_id: &str) -> bool {
        let key = (device_id, application_id.to_string());
        let Some(attribution) = self.active.get_mut(&key) else {
            return false;
        };
        if !attribution.containers.remove(container_id) {
            return false;
        }
        if attribution.containers.is_empty() {
            if let Some(done) = self.active.remove(&key) {
                debug!(
                    device = device_id,
                    application = %application_id,
                    spread = done.spread(),
                    "Application deactivated"
                );
                self.finished.push_back(Finished {
                    device_id,
                    application_id: key.1,
                    spread: done.spread(),
                });
                while self.finished.len() > self.history_capacity {
                    self.finished.pop_front();
                }
            }
        }
        true
    }

    /// Raise the running maximum of every active application
    pub fn record_sample(&mut self, utilization: u32) {
        for attribution in self.active.values_mut() {
            attribution.max_utilization = attribution.max_utilization.max(utilization);
        }
    }

    /// Raise the running maximum of applications active on `device_id`
    pub fn record_device_sample(&mut self, device_id: u32, utilization: u32) {
        for ((device, _), attribution) in self.active.iter_mut() {
            if *device == device_id {
                attribution.max_utilization = attribution.max_utilization.max(utilization);
            }
        }
    }

    /// Estimated utilization contribution of an application.
    ///
    /// `(max - min) / containers` while active, `max - min` once finished,
    /// 0 if unknown.
    pub fn app_utilization(&self, device_id: u32, application_id: &str) -> u32 {
        if let Some(attribution) = self.active.get(&(device_id, application_id.to_string())) {
            return attribution.spread() / attribution.containers.len().max(1) as u32;
        }
        self.finished
            .iter()
            .rev()
            .find(|f| f.device_id == device_id && f.application_id == application_id)
            .map(|f| f.spread)
            .unwrap_or(0)
    }

    /// Whether any container of the application is still monitored
    pub fn is_active(&self, device_id: u32, application_id: &str) -> bool {
        self.active
            .contains_key(&(device_id, application_id.to_string()))
    }

    /// Active applications (sorted by device and id) followed by finished ones
    pub fn history(&self) -> Vec<GpuApplicationHistory> {
        let mut active: Vec<GpuApplicationHistory> = self
            .active
            .iter()
            .map(|((device_id, application_id), attribution)| GpuApplicationHistory {
                device_id: *device_id,
                application_id: application_id.clone(),
                gpu_utilization: attribution.spread()
                    / attribution.containers.len().max(1) as u32,
                active_containers: attribution.containers.len(),
            })
            .collect();
        active.sort_by(|a, b| {
            (a.device_id, &a.application_id).cmp(&(b.device_id, &b.application_id))
        });

        active.extend(self.finished.iter().map(|f| GpuApplicationHistory {
            device_id: f.device_id,
            application_id: f.application_id.clone(),
            gpu_utilization: f.spread,
            active_containers: 0,
        }));
        active
    }
}
