//! gpuslot-monitor: Live GPU usage sampling
//!
//! This crate keeps a live view of GPU devices and the processes using them:
//! - Parsing of `nvidia-smi` style status output
//! - Subprocess status source with a bounded query time
//! - Process ancestry rollup via procfs
//! - Atomically published per-tick snapshots
//! - Per-application utilization attribution

pub mod attribution;
pub mod monitor;
pub mod parser;
pub mod process_tree;
pub mod snapshot;
pub mod source;

pub use attribution::ApplicationTracker;
pub use monitor::{DeviceMonitor, MonitorHandle};
pub use process_tree::{ProcessTree, ProcfsTree};
pub use snapshot::MonitorSnapshot;
pub use source::{CommandSource, StatusSource};
