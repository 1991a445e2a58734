//! Background device monitor

use arc_swap::ArcSwap;
use gpuslot_core::{
    select_device, GpuApplicationHistory, GpuStatus, GpuslotResult, MonitorConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attribution::ApplicationTracker;
use crate::parser::StatusSample;
use crate::process_tree::{ProcessTree, ProcfsTree};
use crate::snapshot::MonitorSnapshot;
use crate::source::{CommandSource, StatusSource};

/// Live view of GPU device and process usage.
///
/// Each tick queries the status source, rebuilds a [`MonitorSnapshot`] and
/// publishes it with one atomic swap; queries read the latest snapshot
/// without locking. Application attribution is kept separately because it
/// is driven by container start/stop calls rather than by ticks.
pub struct DeviceMonitor {
    config: MonitorConfig,
    source: Arc<dyn StatusSource>,
    tree: Arc<dyn ProcessTree>,
    snapshot: ArcSwap<MonitorSnapshot>,
    /// First-seen total memory per device
    totals: Mutex<HashMap<u32, i64>>,
    tracker: Mutex<ApplicationTracker>,
    ticks: AtomicU64,
}

impl DeviceMonitor {
    /// Create a monitor over an explicit source and process tree
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn StatusSource>,
        tree: Arc<dyn ProcessTree>,
    ) -> Self {
        let tracker = ApplicationTracker::new(config.history_capacity);
        Self {
            config,
            source,
            tree,
            snapshot: ArcSwap::from_pointee(MonitorSnapshot::default()),
            totals: Mutex::new(HashMap::new()),
            tracker: Mutex::new(tracker),
            ticks: AtomicU64::new(0),
        }
    }

    /// Create a monitor that runs the configured command and reads procfs
    pub fn from_config(config: MonitorConfig) -> Self {
        let source = Arc::new(CommandSource::from_config(&config));
        let tree = Arc::new(ProcfsTree::new(config.proc_root.clone()));
        Self::new(config, source, tree)
    }

    /// Run one sampling tick and publish the resulting snapshot.
    ///
    /// On error nothing is published and the previous snapshot stays current.
    pub async fn sample_once(&self) -> GpuslotResult<Arc<MonitorSnapshot>> {
        let lines = self.source.query().await?;
        let sample = StatusSample::from_lines(&lines);

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = {
            let mut totals = self.totals.lock().await;
            MonitorSnapshot::build(
                tick,
                &sample,
                &mut totals,
                self.tree.as_ref(),
                self.config.max_ancestor_depth,
            )
        };
        let snapshot = Arc::new(snapshot);
        self.snapshot.store(snapshot.clone());

        {
            let mut tracker = self.tracker.lock().await;
            for (device_id, state) in &snapshot.devices {
                tracker.record_device_sample(*device_id, state.utilization);
            }
        }

        debug!(
            tick = tick,
            devices = snapshot.devices.len(),
            processes = snapshot.process_memory.len(),
            "Published device snapshot"
        );
        Ok(snapshot)
    }

    /// Sample every `interval_ms` until `token` is cancelled.
    ///
    /// A failed tick is logged and skipped. Cancellation is observed between
    /// ticks; an in-flight query is bounded by the source's own timeout.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let period = Duration::from_millis(self.config.interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            source = %self.source.name(),
            interval_ms = self.config.interval_ms,
            "Device monitor started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.sample_once().await {
                warn!(
                    source = %self.source.name(),
                    error = %e,
                    "Device sampling failed, tick abandoned"
                );
            }
        }

        info!(ticks = self.ticks.load(Ordering::Relaxed), "Device monitor stopped");
    }

    /// Spawn the sampling loop on the current runtime
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> MonitorHandle {
        let task = tokio::spawn(self.clone().run(token.clone()));
        MonitorHandle { token, task }
    }

    /// Latest published snapshot
    pub fn current(&self) -> Arc<MonitorSnapshot> {
        self.snapshot.load_full()
    }

    /// Number of successful ticks so far
    pub fn tick_count(&self) -> u64 {
        self.current().tick
    }

    /// Utilization and free memory per device
    pub fn gpu_statuses(&self) -> Vec<GpuStatus> {
        self.snapshot.load().gpu_statuses()
    }

    /// GPU memory in MiB used by `pid` and its descendants; 0 if unknown
    pub fn process_memory_usage(&self, pid: u32) -> i64 {
        self.snapshot.load().process_memory_usage(pid)
    }

    /// Used memory in MiB on `device_id`; 0 if unknown
    pub fn device_memory_usage(&self, device_id: u32) -> i64 {
        self.snapshot.load().device_memory_usage(device_id)
    }

    /// Best-effort device choice for `required_gpu_memory` MiB, see [`select_device`]
    pub fn select_device(&self, required_gpu_memory: i64) -> Option<u32> {
        select_device(&self.gpu_statuses(), required_gpu_memory)
    }

    /// Begin attributing utilization on `device_id` to a container of `application_id`
    pub async fn start_monitoring(
        &self,
        device_id: u32,
        application_id: &str,
        container_id: &str,
    ) -> usize {
        let current = self.snapshot.load().utilization(device_id).unwrap_or(0);
        let count = self
            .tracker
            .lock()
            .await
            .start(device_id, application_id, container_id, current);
        info!(
            device = device_id,
            application = %application_id,
            container = %container_id,
            containers = count,
            "Started GPU utilization monitor"
        );
        count
    }

    /// Stop attributing utilization to a container; unknown containers are ignored
    pub async fn stop_monitoring(
        &self,
        device_id: u32,
        application_id: &str,
        container_id: &str,
    ) -> bool {
        let removed = self
            .tracker
            .lock()
            .await
            .stop(device_id, application_id, container_id);
        if removed {
            info!(
                device = device_id,
                application = %application_id,
                container = %container_id,
                "Removed GPU utilization monitor"
            );
        }
        removed
    }

    /// Raise the running maximum of every active application
    pub async fn record_utilization_sample(&self, utilization: u32) {
        self.tracker.lock().await.record_sample(utilization);
    }

    /// Estimated utilization contribution of an application on a device
    pub async fn app_utilization(&self, device_id: u32, application_id: &str) -> u32 {
        self.tracker
            .lock()
            .await
            .app_utilization(device_id, application_id)
    }

    /// Attribution records for active and recently finished applications
    pub async fn application_history(&self) -> Vec<GpuApplicationHistory> {
        self.tracker.lock().await.history()
    }
}

/// Handle to a running monitor loop
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Token that stops the loop when cancelled
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Device monitor task ended abnormally");
        }
    }
}
