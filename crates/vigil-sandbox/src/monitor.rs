//! Resource usage snapshots for running sandboxes
//!
//! Observability only; nothing on the execution path reads these.

use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, StatsSample};

#[derive(Debug, Clone, Serialize)]
pub struct ContainerUsage {
    pub container_id: String,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub state: String,
}

/// The `docker stats` CPU formula: container delta over system delta,
/// scaled by online CPUs. Zero when either delta is not positive.
pub fn cpu_percent(sample: &StatsSample) -> f64 {
    let cpu_delta = sample.cpu_total_usage as f64 - sample.precpu_total_usage as f64;
    let system_delta = sample.system_cpu_usage as f64 - sample.presystem_cpu_usage as f64;

    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }

    let cpus = sample.online_cpus.max(1) as f64;
    cpu_delta / system_delta * cpus * 100.0
}

pub struct ResourceMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    prefix: String,
}

impl ResourceMonitor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, prefix: impl Into<String>) -> Self {
        Self {
            runtime,
            prefix: prefix.into(),
        }
    }

    /// Usage of every running sandbox. A container that exits between the
    /// listing and its stats read is skipped.
    pub async fn snapshot(&self) -> Result<Vec<ContainerUsage>, RuntimeError> {
        let containers = self.runtime.list(&self.prefix, false).await?;
        let mut usage = Vec::with_capacity(containers.len());

        for container in containers {
            let sample = match self.runtime.stats(&container.id).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Stats unavailable");
                    continue;
                }
            };

            usage.push(ContainerUsage {
                cpu_percent: cpu_percent(&sample),
                memory_usage: sample.memory_usage,
                memory_limit: sample.memory_limit,
                container_id: container.id,
                name: container.name,
                state: container.state,
            });
        }

        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;
    use chrono::Utc;

    fn sample() -> StatsSample {
        StatsSample {
            cpu_total_usage: 300,
            precpu_total_usage: 100,
            system_cpu_usage: 2_000,
            presystem_cpu_usage: 1_000,
            online_cpus: 2,
            memory_usage: 10 * 1024 * 1024,
            memory_limit: 512 * 1024 * 1024,
        }
    }

    #[test]
    fn test_cpu_percent_formula() {
        // 200 / 1000 * 2 cpus * 100
        assert!((cpu_percent(&sample()) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_percent_without_progress() {
        let idle = StatsSample {
            precpu_total_usage: 300,
            ..sample()
        };
        assert_eq!(cpu_percent(&idle), 0.0);

        let first_read = StatsSample {
            presystem_cpu_usage: 0,
            system_cpu_usage: 0,
            ..sample()
        };
        assert_eq!(cpu_percent(&first_read), 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_running_sandboxes() {
        let runtime = Arc::new(MockRuntime::new());
        let running = runtime.insert_container("vigil-sandbox-exec-a", Utc::now(), "running");
        runtime.insert_container("vigil-sandbox-exec-b", Utc::now(), "exited");
        let other = runtime.insert_container("redis", Utc::now(), "running");
        runtime.set_stats(&running, sample());
        runtime.set_stats(&other, sample());

        let usage = ResourceMonitor::new(runtime, "vigil-sandbox-")
            .snapshot()
            .await
            .unwrap();

        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].container_id, running);
        assert_eq!(usage[0].memory_limit, 512 * 1024 * 1024);
        assert!(usage[0].cpu_percent > 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_skips_missing_stats() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container("vigil-sandbox-exec-a", Utc::now(), "running");

        let usage = ResourceMonitor::new(runtime, "vigil-sandbox-")
            .snapshot()
            .await
            .unwrap();
        assert!(usage.is_empty());
    }
}
