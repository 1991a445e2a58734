//! Configuration types for gpuslot

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::resource::Resource;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuslotConfig {
    /// Device monitor configuration
    pub monitor: MonitorConfig,
    /// Reservation plan configuration
    pub plan: PlanConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl GpuslotConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuslotError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuslotError::Config(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, crate::GpuslotError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor or plan cannot run with
    pub fn validate(&self) -> Result<(), crate::GpuslotError> {
        if self.monitor.interval_ms == 0 {
            return Err(crate::GpuslotError::Config(
                "monitor.interval_ms must be positive".to_string(),
            ));
        }
        if self.plan.step_ms <= 0 {
            return Err(crate::GpuslotError::Config(
                "plan.step_ms must be positive".to_string(),
            ));
        }
        if let SharingPolicyConfig::UserShareCap { max_share } = self.plan.policy {
            if !(0.0..=1.0).contains(&max_share) {
                return Err(crate::GpuslotError::Config(format!(
                    "plan.policy.max_share must be within [0, 1], got {}",
                    max_share
                )));
            }
        }
        Ok(())
    }
}

/// Device monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Device status command
    pub command: String,
    /// Arguments passed to the status command
    pub args: Vec<String>,
    /// Sampling interval in milliseconds
    pub interval_ms: u64,
    /// Upper bound for one status query in milliseconds
    pub query_timeout_ms: u64,
    /// Root of the process status filesystem
    pub proc_root: PathBuf,
    /// Maximum number of ancestors a process's GPU memory is attributed to
    pub max_ancestor_depth: usize,
    /// Finished applications kept for history queries
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            command: "nvidia-smi".to_string(),
            args: Vec::new(),
            interval_ms: 300,
            query_timeout_ms: 2000,
            proc_root: PathBuf::from("/proc"),
            max_ancestor_depth: 64,
            history_capacity: 1024,
        }
    }
}

/// Reservation plan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Queue the plan admits reservations for
    pub queue_name: String,
    /// Curve sampling granularity in milliseconds
    pub step_ms: i64,
    /// Total capacity of the queue
    pub capacity: Resource,
    /// Sharing policy enforced on every mutation
    pub policy: SharingPolicyConfig,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            queue_name: "dedicated".to_string(),
            step_ms: 1000,
            capacity: Resource::NONE,
            policy: SharingPolicyConfig::NoOverCommit,
        }
    }
}

/// Sharing policy selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SharingPolicyConfig {
    /// Reject only when aggregate usage exceeds capacity at some instant
    NoOverCommit,
    /// No over-commit, and no single user above `max_share` of capacity
    UserShareCap {
        /// Fraction of capacity one user may hold at any instant
        max_share: f64,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
