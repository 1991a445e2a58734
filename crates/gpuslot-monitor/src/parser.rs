//! Parser for `nvidia-smi` style tabular status output
//!
//! Three line shapes are recognised, each independently (a single device row
//! carries both a memory and a utilization figure):
//!
//! - process rows: `|    0      4242    C   python      1100MiB |`
//! - device memory: `|   1123MiB / 12287MiB |`
//! - device utilization: `|      3%      Default |`
//!
//! Anything else is ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static PROCESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\|?\s*(\d+)\s+(?:(?:N/A|\d+)\s+(?:N/A|\d+)\s+)?(\d+)\s+(C\+G|C|G)\s+(.+?)\s+(\d+)\s?MiB\s*\|?\s*$",
    )
    .expect("process line pattern is valid")
});

static MEMORY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s(\d+)\s?MiB\s*/\s*(\d+)\s?MiB").expect("memory line pattern is valid")
});

static UTILIZATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s(\d+)\s?%\s+Default").expect("utilization line pattern is valid")
});

/// GPU context type reported for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextKind {
    Compute,
    Graphics,
    ComputeGraphics,
}

/// One process row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessLine {
    pub device: u32,
    pub pid: u32,
    pub kind: ContextKind,
    pub name: String,
    pub memory_mib: i64,
}

/// Parse a process row
pub fn parse_process_line(line: &str) -> Option<ProcessLine> {
    let caps = PROCESS_LINE.captures(line)?;
    let kind = match &caps[3] {
        "C" => ContextKind::Compute,
        "G" => ContextKind::Graphics,
        _ => ContextKind::ComputeGraphics,
    };
    Some(ProcessLine {
        device: caps[1].parse().ok()?,
        pid: caps[2].parse().ok()?,
        kind,
        name: caps[4].to_string(),
        memory_mib: caps[5].parse().ok()?,
    })
}

/// Parse `<used>MiB / <total>MiB`, returning `(used, total)`
pub fn parse_memory_line(line: &str) -> Option<(i64, i64)> {
    let caps = MEMORY_LINE.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Parse `<percent>% Default`
pub fn parse_utilization_line(line: &str) -> Option<u32> {
    UTILIZATION_LINE.captures(line)?[1].parse().ok()
}

/// Everything recognised in one status query, in output order.
///
/// Device ids are positional: the n-th memory row and the n-th utilization
/// row both describe device `n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSample {
    pub processes: Vec<ProcessLine>,
    pub memory: Vec<(i64, i64)>,
    pub utilization: Vec<u32>,
}

impl StatusSample {
    /// Fold status output lines into a sample
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sample = StatusSample::default();
        for line in lines {
            let line = line.as_ref();
            if let Some(process) = parse_process_line(line) {
                sample.processes.push(process);
            }
            if let Some(memory) = parse_memory_line(line) {
                sample.memory.push(memory);
            }
            if let Some(utilization) = parse_utilization_line(line) {
                sample.utilization.push(utilization);
            }
        }
        sample
    }

    /// Number of devices seen by either counter
    pub fn device_count(&self) -> usize {
        self.memory.len().max(self.utilization.len())
    }
}
