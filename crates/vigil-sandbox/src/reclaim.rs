//! Orphan reclamation
//!
//! The supervisor always removes its container, unless the process dies
//! first. This sweep catches those leftovers: anything carrying our name
//! prefix that is older than the age threshold gets killed and removed.
//! Safe to run repeatedly and concurrently with executions.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SandboxConfig;
use crate::runtime::{ContainerRuntime, ContainerSummary};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReclaimReport {
    /// Ids of containers that were removed
    pub removed: Vec<String>,
    pub errors: Vec<String>,
}

pub struct OrphanReclaimer {
    runtime: Arc<dyn ContainerRuntime>,
    prefix: String,
    max_age: Duration,
}

impl OrphanReclaimer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, prefix: impl Into<String>, max_age: Duration) -> Self {
        Self {
            runtime,
            prefix: prefix.into(),
            max_age,
        }
    }

    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &SandboxConfig) -> Self {
        Self::new(
            runtime,
            config.container_prefix.clone(),
            Duration::from_secs(config.orphan_max_age_secs),
        )
    }

    /// One sweep. Failures on individual containers don't stop the sweep.
    pub async fn reclaim(&self) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        let containers = match self.runtime.list(&self.prefix, true).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Orphan sweep could not list containers");
                report.errors.push(format!("list: {e}"));
                return report;
            }
        };

        for container in containers.iter().filter(|c| self.is_orphan(c)) {
            if container.is_running() {
                if let Err(e) = self.runtime.stop(&container.id, 0).await {
                    if !e.is_benign_for_cleanup() {
                        debug!(container = %container.name, error = %e, "Stop before reclaim failed");
                    }
                }
            }

            match self.runtime.remove(&container.id).await {
                Ok(()) => {
                    info!(container = %container.name, id = %container.id, "Reclaimed orphan sandbox");
                    report.removed.push(container.id.clone());
                }
                // Someone else got there first
                Err(e) if e.is_benign_for_cleanup() => {
                    debug!(container = %container.name, id = %container.id, error = %e, "Orphan already gone");
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Failed to reclaim orphan");
                    report.errors.push(format!("{}: {e}", container.name));
                }
            }
        }

        report
    }

    /// Sweep every `interval` until the handle is aborted
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let report = self.reclaim().await;
                if !report.errors.is_empty() {
                    error!(errors = ?report.errors, "Orphan sweep finished with errors");
                } else if !report.removed.is_empty() {
                    info!(removed = report.removed.len(), "Orphan sweep finished");
                }
            }
        })
    }

    fn is_orphan(&self, container: &ContainerSummary) -> bool {
        // Negative age (clock skew) converts to Err: treat as young
        match (Utc::now() - container.created_at).to_std() {
            Ok(age) => age > self.max_age,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::mock::MockRuntime;

    const PREFIX: &str = "vigil-sandbox-";

    fn reclaimer(runtime: Arc<MockRuntime>) -> OrphanReclaimer {
        OrphanReclaimer::new(runtime, PREFIX, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_old_container_is_removed() {
        let runtime = Arc::new(MockRuntime::new());
        let old = runtime.insert_container(
            "vigil-sandbox-exec-old",
            Utc::now() - chrono::Duration::minutes(10),
            "running",
        );

        let report = reclaimer(runtime.clone()).reclaim().await;
        assert_eq!(report.removed, vec![old]);
        assert!(report.errors.is_empty());
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_young_container_is_left_alone() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container(
            "vigil-sandbox-exec-young",
            Utc::now() - chrono::Duration::seconds(30),
            "running",
        );

        let report = reclaimer(runtime.clone()).reclaim().await;
        assert!(report.removed.is_empty());
        assert!(runtime.contains("vigil-sandbox-exec-young"));
        assert_eq!(runtime.state_of("vigil-sandbox-exec-young").as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_foreign_containers_are_ignored() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container("postgres", Utc::now() - chrono::Duration::days(3), "running");
        runtime.insert_container(
            "vigil-sandbox-exec-stale",
            Utc::now() - chrono::Duration::hours(1),
            "exited",
        );

        let report = reclaimer(runtime.clone()).reclaim().await;
        assert_eq!(report.removed.len(), 1);
        assert!(runtime.contains("postgres"));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container(
            "vigil-sandbox-exec-old",
            Utc::now() - chrono::Duration::minutes(10),
            "exited",
        );
        let reclaimer = reclaimer(runtime.clone());

        assert_eq!(reclaimer.reclaim().await.removed.len(), 1);
        let second = reclaimer.reclaim().await;
        assert!(second.removed.is_empty());
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_remove_errors_are_collected() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container(
            "vigil-sandbox-exec-old",
            Utc::now() - chrono::Duration::minutes(10),
            "exited",
        );
        runtime.fail_remove(RuntimeError::Api {
            status: 500,
            message: "busy".to_string(),
        });

        let report = reclaimer(runtime).reclaim().await;
        assert!(report.removed.is_empty());
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_daemon_reports_error() {
        let report = reclaimer(Arc::new(MockRuntime::unavailable())).reclaim().await;
        assert!(report.removed.is_empty());
        assert!(report.errors[0].starts_with("list:"));
    }

    #[tokio::test]
    async fn test_periodic_sweep() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container(
            "vigil-sandbox-exec-old",
            Utc::now() - chrono::Duration::minutes(10),
            "running",
        );

        let handle = Arc::new(reclaimer(runtime.clone())).spawn_periodic(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(runtime.container_count(), 0);
    }
}
