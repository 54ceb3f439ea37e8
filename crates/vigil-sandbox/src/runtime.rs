//! Container runtime seam
//!
//! The provisioner, supervisor, reclaimer and monitor only talk to the
//! daemon through [`ContainerRuntime`]. Production uses the Docker backend;
//! tests swap in the in-memory mock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::RuntimeError;
use crate::limits::ResourceLimits;

/// Everything needed to create one sandbox container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub env: Vec<String>,
    /// "host:container:ro" bind strings
    pub binds: Vec<String>,
    /// container path -> tmpfs mount options
    pub tmpfs: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub user: Option<String>,
    /// Keep stdin open so inputs can be written after start
    pub open_stdin: bool,
    pub limits: ResourceLimits,
}

/// Appended once when a stream hits its byte cap
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Demultiplexed container logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn push_stdout(&mut self, chunk: &str, limit: usize) {
        push_capped(&mut self.stdout, chunk, limit);
    }

    pub fn push_stderr(&mut self, chunk: &str, limit: usize) {
        push_capped(&mut self.stderr, chunk, limit);
    }

    /// Both streams trimmed, the shape callers see
    pub fn trimmed(self) -> Self {
        Self {
            stdout: self.stdout.trim().to_string(),
            stderr: self.stderr.trim().to_string(),
        }
    }
}

/// Append `chunk` to `buf` without letting `buf` grow past `limit` bytes
/// of payload. Cuts on a char boundary and marks the cut once.
fn push_capped(buf: &mut String, chunk: &str, limit: usize) {
    if buf.ends_with(TRUNCATION_MARKER) {
        return;
    }
    let room = limit.saturating_sub(buf.len());
    if chunk.len() <= room {
        buf.push_str(chunk);
        return;
    }
    let mut cut = room;
    while cut > 0 && !chunk.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.push_str(&chunk[..cut]);
    buf.push_str(TRUNCATION_MARKER);
}

/// One row of a container listing
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    /// Without the leading '/' the daemon adds
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// "created", "running", "exited", ...
    pub state: String,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Raw cumulative counters from one stats read.
///
/// `precpu_*` is the daemon's previous sample; the CPU percentage is the
/// delta between the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSample {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Cheap liveness probe of the daemon
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Make sure `image` is present locally, pulling it if needed
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create (but don't start) a container; returns its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start the container, then write `stdin` (if any) and close it
    async fn start(&self, name: &str, stdin: Option<Vec<u8>>) -> Result<(), RuntimeError>;

    /// Block until the container is no longer running; returns the exit code
    async fn wait(&self, name: &str) -> Result<i64, RuntimeError>;

    /// Stdout and stderr captured so far, each capped at `limit` bytes
    async fn logs(&self, name: &str, limit: usize) -> Result<CapturedOutput, RuntimeError>;

    /// Stop with the given grace period (0 = SIGKILL immediately)
    async fn stop(&self, name: &str, grace_secs: i64) -> Result<(), RuntimeError>;

    /// Force-remove the container and its anonymous volumes
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// Containers whose name starts with `prefix`; `all` includes stopped ones
    async fn list(&self, prefix: &str, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn stats(&self, id: &str) -> Result<StatsSample, RuntimeError>;
}

/// Keep only summaries whose name really starts with `prefix`.
///
/// Daemon name filters match substrings, so backends post-filter with this.
pub fn retain_prefixed(summaries: Vec<ContainerSummary>, prefix: &str) -> Vec<ContainerSummary> {
    summaries
        .into_iter()
        .filter(|s| s.name.starts_with(prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str) -> ContainerSummary {
        ContainerSummary {
            id: format!("id-{name}"),
            name: name.to_string(),
            created_at: Utc::now(),
            state: "running".to_string(),
        }
    }

    #[test]
    fn test_retain_prefixed() {
        let rows = vec![
            summary("vigil-sandbox-exec-1"),
            summary("my-vigil-sandbox-exec-2"),
            summary("postgres"),
        ];
        let kept = retain_prefixed(rows, "vigil-sandbox-");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "vigil-sandbox-exec-1");
        assert!(kept[0].is_running());
    }

    #[test]
    fn test_output_cap() {
        let mut out = CapturedOutput::default();
        out.push_stdout("hello ", 8);
        out.push_stdout("world", 8);
        out.push_stdout("more", 8);
        assert_eq!(out.stdout, format!("hello wo{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_output_cap_respects_char_boundary() {
        let mut out = CapturedOutput::default();
        out.push_stderr("ééé", 3);
        assert_eq!(out.stderr, format!("é{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_trimmed() {
        let out = CapturedOutput {
            stdout: "  True\n".to_string(),
            stderr: "\n".to_string(),
        };
        let out = out.trimmed();
        assert_eq!(out.stdout, "True");
        assert!(out.stderr.is_empty());
    }
}
