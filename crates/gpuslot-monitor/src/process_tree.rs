//! Process ancestry lookup

use std::path::PathBuf;

/// Resolves the parent of an OS process
pub trait ProcessTree: Send + Sync {
    /// Parent pid of `pid`, or `None` if the process is gone or unreadable
    fn parent_of(&self, pid: u32) -> Option<u32>;
}

/// Reads parent pids from `<root>/<pid>/stat`
#[derive(Debug, Clone)]
pub struct ProcfsTree {
    root: PathBuf,
}

impl ProcfsTree {
    /// Create a tree reader rooted at `root` (normally `/proc`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsTree {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessTree for ProcfsTree {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        let stat = std::fs::read_to_string(self.root.join(pid.to_string()).join("stat")).ok()?;
        parse_stat_parent(&stat)
    }
}

/// Extract the parent pid from a `stat` line: `pid (comm) state ppid ...`.
///
/// The command name may itself contain spaces and parentheses, so fields are
/// counted from the last closing parenthesis.
pub fn parse_stat_parent(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Ancestors of `pid`, nearest first, up to `max_depth` entries.
///
/// The walk stops at pid 0/1 (init is never attributed), when a lookup
/// fails, or when a cycle is detected.
pub fn ancestors(tree: &dyn ProcessTree, pid: u32, max_depth: usize) -> Vec<u32> {
    let mut chain = Vec::new();
    let mut current = pid;
    while chain.len() < max_depth {
        match tree.parent_of(current) {
            Some(parent) if parent > 1 && parent != pid && !chain.contains(&parent) => {
                chain.push(parent);
                current = parent;
            }
            _ => break,
        }
    }
    chain
}
