//! Resource limit translation
//!
//! Converts the strings operators write ("512m", "0.5") into what the
//! daemon wants (bytes, CFS quota/period). Parsing is lenient on purpose:
//! garbage falls back to a documented default instead of failing the run.

use crate::config::SandboxConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Used when a memory string can't be parsed
pub const DEFAULT_MEMORY_BYTES: i64 = 512 * 1024 * 1024;

/// Used when a CPU string can't be parsed
pub const DEFAULT_CPU_FRACTION: f64 = 0.5;

/// CFS scheduling period in microseconds (100ms)
pub const CPU_PERIOD_US: i64 = 100_000;

fn memory_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d+)([kmg]?)$").expect("memory limit pattern is a valid regex")
    })
}

/// Parse "512m" / "1g" / "2048k" / "1048576" into bytes.
///
/// Unparseable input, zero, and values that overflow fall back to
/// [`DEFAULT_MEMORY_BYTES`]. Zero is treated as garbage because the daemon
/// reads 0 as "unlimited".
pub fn parse_memory(value: &str) -> i64 {
    let Some(caps) = memory_pattern().captures(value.trim()) else {
        return DEFAULT_MEMORY_BYTES;
    };

    let Ok(amount) = caps[1].parse::<i64>() else {
        return DEFAULT_MEMORY_BYTES;
    };

    let multiplier: i64 = match caps[2].to_ascii_lowercase().as_str() {
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => 1,
    };

    match amount.checked_mul(multiplier) {
        Some(bytes) if bytes > 0 => bytes,
        _ => DEFAULT_MEMORY_BYTES,
    }
}

/// Parse a CPU fraction ("0.5" = half a core).
///
/// Non-numeric, non-finite and non-positive values fall back to
/// [`DEFAULT_CPU_FRACTION`].
pub fn parse_cpu(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(fraction) if fraction.is_finite() && fraction > 0.0 => fraction,
        _ => DEFAULT_CPU_FRACTION,
    }
}

/// A CPU fraction expressed as CFS quota per period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuShare {
    pub quota: i64,
    pub period: i64,
}

impl CpuShare {
    pub fn from_fraction(fraction: f64) -> Self {
        Self {
            quota: (fraction * CPU_PERIOD_US as f64).floor() as i64,
            period: CPU_PERIOD_US,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ulimit {
    pub name: String,
    pub soft: i64,
    pub hard: i64,
}

impl Ulimit {
    pub fn fixed(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            soft: value,
            hard: value,
        }
    }
}

/// Everything the provisioner needs to lock a container down.
///
/// Derived deterministically from [`SandboxConfig`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub cpu: CpuShare,
    pub network_disabled: bool,
    pub read_only_rootfs: bool,
    /// Always ["ALL"] for this engine
    pub capabilities_dropped: Vec<String>,
    pub no_new_privileges: bool,
    pub ulimits: Vec<Ulimit>,
    pub pids_limit: Option<i64>,
}

impl ResourceLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            memory_bytes: parse_memory(&config.memory_limit),
            cpu: CpuShare::from_fraction(parse_cpu(&config.cpu_limit)),
            network_disabled: config.network_disabled,
            read_only_rootfs: config.read_only_rootfs,
            capabilities_dropped: vec!["ALL".to_string()],
            no_new_privileges: true,
            ulimits: vec![
                Ulimit::fixed("nofile", config.max_open_files),
                Ulimit::fixed("nproc", config.max_processes),
            ],
            pids_limit: config.pids_limit,
        }
    }

    /// Docker network mode for these limits
    pub fn network_mode(&self) -> &'static str {
        if self.network_disabled {
            "none"
        } else {
            "bridge"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory("512m"), 512 * 1024 * 1024);
        assert_eq!(parse_memory("1g"), 1024 * 1024 * 1024);
        assert_eq!(parse_memory("64k"), 64 * 1024);
        assert_eq!(parse_memory("1048576"), 1_048_576);
    }

    #[test]
    fn test_parse_memory_case_insensitive() {
        assert_eq!(parse_memory("1G"), 1024 * 1024 * 1024);
        assert_eq!(parse_memory("256M"), 256 * 1024 * 1024);
    }

    #[test]
    fn test_parse_memory_fallback() {
        assert_eq!(parse_memory("garbage"), DEFAULT_MEMORY_BYTES);
        assert_eq!(parse_memory(""), DEFAULT_MEMORY_BYTES);
        assert_eq!(parse_memory("12mb"), DEFAULT_MEMORY_BYTES);
        assert_eq!(parse_memory("-5m"), DEFAULT_MEMORY_BYTES);
        assert_eq!(parse_memory("0"), DEFAULT_MEMORY_BYTES);
        assert_eq!(parse_memory("99999999999999999999g"), DEFAULT_MEMORY_BYTES);
    }

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_cpu("0.5"), 0.5);
        assert_eq!(parse_cpu("2"), 2.0);
        assert_eq!(parse_cpu("abc"), DEFAULT_CPU_FRACTION);
        assert_eq!(parse_cpu("0"), DEFAULT_CPU_FRACTION);
        assert_eq!(parse_cpu("NaN"), DEFAULT_CPU_FRACTION);
    }

    #[test]
    fn test_cpu_share() {
        let share = CpuShare::from_fraction(0.5);
        assert_eq!(share.quota, 50_000);
        assert_eq!(share.period, 100_000);

        // floor, not round
        assert_eq!(CpuShare::from_fraction(0.333339).quota, 33_333);
    }

    #[test]
    fn test_limits_from_default_config() {
        let limits = ResourceLimits::from_config(&SandboxConfig::default());
        assert_eq!(limits.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(limits.cpu.quota, 50_000);
        assert_eq!(limits.capabilities_dropped, vec!["ALL".to_string()]);
        assert!(limits.no_new_privileges);
        assert_eq!(limits.network_mode(), "none");
        assert!(limits.ulimits.contains(&Ulimit::fixed("nofile", 64)));
        assert!(limits.ulimits.contains(&Ulimit::fixed("nproc", 32)));
    }

    #[test]
    fn test_network_override() {
        let config = SandboxConfig {
            network_disabled: false,
            ..SandboxConfig::default()
        };
        assert_eq!(ResourceLimits::from_config(&config).network_mode(), "bridge");
    }
}
