//! Sandbox configuration
//!
//! Human-readable knobs. `ResourceLimits::from_config` turns these into
//! daemon units.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name prefix shared by every container this engine creates.
/// The reclaimer and monitor only ever touch containers carrying it.
pub const DEFAULT_CONTAINER_PREFIX: &str = "vigil-sandbox-";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Memory cap, e.g. "512m", "1g"
    pub memory_limit: String,
    /// Fraction of one core, e.g. "0.5"
    pub cpu_limit: String,
    pub network_disabled: bool,
    pub read_only_rootfs: bool,
    /// RLIMIT_NOFILE
    pub max_open_files: i64,
    /// RLIMIT_NPROC
    pub max_processes: i64,
    /// cgroup pids limit, independent of the nproc ulimit
    pub pids_limit: Option<i64>,
    /// Size of the writable tmpfs mounted at /tmp
    pub tmpfs_size: String,
    /// uid:gid the code runs as inside the container
    pub user: Option<String>,
    /// Host directory for code files; bind-mounted read-only
    pub sandbox_dir: PathBuf,
    pub container_prefix: String,
    /// Per-stream cap on captured output
    pub max_output_bytes: usize,
    /// Containers older than this are orphans
    pub orphan_max_age_secs: u64,
    pub pull_missing_images: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: "512m".to_string(),
            cpu_limit: "0.5".to_string(),
            network_disabled: true,
            read_only_rootfs: true,
            max_open_files: 64,
            max_processes: 32,
            pids_limit: Some(64),
            tmpfs_size: "16m".to_string(),
            user: Some("65534:65534".to_string()),
            sandbox_dir: std::env::temp_dir().join("vigil-sandbox"),
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            max_output_bytes: 64 * 1024, // 64KB
            orphan_max_age_secs: 5 * 60,
            pull_missing_images: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_locked_down() {
        let config = SandboxConfig::default();
        assert!(config.network_disabled);
        assert!(config.read_only_rootfs);
        assert_eq!(config.max_open_files, 64);
        assert_eq!(config.max_processes, 32);
        assert_eq!(config.orphan_max_age_secs, 300);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"memory_limit": "256m", "network_disabled": false}"#).unwrap();
        assert_eq!(config.memory_limit, "256m");
        assert!(!config.network_disabled);
        assert_eq!(config.cpu_limit, "0.5");
        assert_eq!(config.container_prefix, DEFAULT_CONTAINER_PREFIX);
    }
}
