//! Device status sources

use async_trait::async_trait;
use gpuslot_core::{GpuslotError, GpuslotResult, MonitorConfig};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Source of line-oriented device status text
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Run one status query and return its output lines
    async fn query(&self) -> GpuslotResult<Vec<String>>;

    /// Get the source name
    fn name(&self) -> &str;
}

/// Runs an external status command such as `nvidia-smi`
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    /// Create a new command source
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build a command source from monitor configuration
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_millis(config.query_timeout_ms),
        )
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self) -> GpuslotResult<Vec<String>> {
        let mut child = self.build_command().spawn().map_err(|e| {
            GpuslotError::Sampling(format!("Failed to spawn {}: {}", self.program, e))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            GpuslotError::Sampling(format!("{} produced no stdout handle", self.program))
        })?;

        let mut reader = BufReader::new(stdout).lines();
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.map_err(|e| {
            GpuslotError::Sampling(format!("Failed to read output of {}: {}", self.program, e))
        })? {
            lines.push(line);
        }

        let status = child.wait().await.map_err(|e| {
            GpuslotError::Sampling(format!("Failed to wait for {}: {}", self.program, e))
        })?;
        if !status.success() {
            return Err(GpuslotError::Sampling(format!(
                "{} exited with {}",
                self.program, status
            )));
        }

        debug!(program = %self.program, lines = lines.len(), "Status query finished");
        Ok(lines)
    }
}

#[async_trait]
impl StatusSource for CommandSource {
    async fn query(&self) -> GpuslotResult<Vec<String>> {
        // Dropping the future on timeout drops the child, which kills it.
        tokio::time::timeout(self.timeout, self.run())
            .await
            .map_err(|_| {
                GpuslotError::Sampling(format!(
                    "{} did not finish within {:?}",
                    self.program, self.timeout
                ))
            })?
    }

    fn name(&self) -> &str {
        &self.program
    }
}
