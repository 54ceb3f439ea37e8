//! Docker backend via the Engine API
//!
//! Talks to the local daemon socket with bollard. No `docker` CLI, no
//! shell strings: every limit is a typed field on the create request.

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::runtime::{
    retain_prefixed, CapturedOutput, ContainerRuntime, ContainerSpec, ContainerSummary,
    StatsSample,
};

/// Container runtime backed by the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Build a client from the usual local defaults (DOCKER_HOST or the
    /// platform socket). This does not contact the daemon yet.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(map_error)?;
        Ok(Self { docker })
    }
}

/// Translate a bollard error into our taxonomy.
///
/// Anything that isn't a server response is a transport problem, which for
/// a local socket means the daemon is unreachable.
fn map_error(err: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error;
    match err {
        Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        Error::DockerResponseServerError {
            status_code: 304,
            message,
        } => RuntimeError::NotModified(message),
        Error::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status: status_code,
            message,
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

fn host_config(spec: &ContainerSpec) -> HostConfig {
    let limits = &spec.limits;
    let ulimits = limits
        .ulimits
        .iter()
        .map(|u| ResourcesUlimits {
            name: Some(u.name.clone()),
            soft: Some(u.soft),
            hard: Some(u.hard),
        })
        .collect();

    let security_opt = if limits.no_new_privileges {
        vec!["no-new-privileges:true".to_string()]
    } else {
        Vec::new()
    };

    HostConfig {
        memory: Some(limits.memory_bytes),
        // Same as memory: no swap
        memory_swap: Some(limits.memory_bytes),
        cpu_quota: Some(limits.cpu.quota),
        cpu_period: Some(limits.cpu.period),
        network_mode: Some(limits.network_mode().to_string()),
        readonly_rootfs: Some(limits.read_only_rootfs),
        binds: Some(spec.binds.clone()),
        tmpfs: Some(spec.tmpfs.clone()),
        // The supervisor removes explicitly
        auto_remove: Some(false),
        cap_drop: Some(limits.capabilities_dropped.clone()),
        cap_add: Some(Vec::new()),
        security_opt: Some(security_opt),
        ulimits: Some(ulimits),
        pids_limit: limits.pids_limit,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(map_error)?;
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await.map_err(map_error) {
            Ok(_) => return Ok(()),
            Err(RuntimeError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(image, "pulling sandbox image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            user: spec.user.clone(),
            network_disabled: Some(spec.limits.network_disabled),
            attach_stdin: Some(spec.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(spec.open_stdin),
            stdin_once: Some(spec.open_stdin),
            tty: Some(false),
            host_config: Some(host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "daemon warning on create");
        }
        Ok(response.id)
    }

    async fn start(&self, name: &str, stdin: Option<Vec<u8>>) -> Result<(), RuntimeError> {
        // Attach before start so nothing written is lost
        let input = if stdin.is_some() {
            let options = AttachContainerOptions::<String> {
                stdin: Some(true),
                stream: Some(true),
                ..Default::default()
            };
            let AttachContainerResults { input, .. } = self
                .docker
                .attach_container(name, Some(options))
                .await
                .map_err(map_error)?;
            Some(input)
        } else {
            None
        };

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)?;

        if let (Some(mut input), Some(bytes)) = (input, stdin) {
            // A program that exits without reading its input closes the pipe
            // under us; that's the program's business, not a runtime failure.
            if let Err(e) = input.write_all(&bytes).await {
                debug!(container = name, error = %e, "stdin write interrupted");
            }
            if let Err(e) = input.shutdown().await {
                debug!(container = name, error = %e, "stdin close failed");
            }
        }
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = Box::pin(self.docker.wait_container(name, Some(options)));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; it's still an exit
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(map_error(e)),
            None => Err(RuntimeError::Api {
                status: 0,
                message: format!("wait stream for {name} ended without a status"),
            }),
        }
    }

    async fn logs(&self, name: &str, limit: usize) -> Result<CapturedOutput, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };
        let mut stream = Box::pin(self.docker.logs(name, Some(options)));
        let mut output = CapturedOutput::default();

        while let Some(frame) = stream.next().await {
            match frame.map_err(map_error)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    output.push_stdout(&String::from_utf8_lossy(&message), limit);
                }
                LogOutput::StdErr { message } => {
                    output.push_stderr(&String::from_utf8_lossy(&message), limit);
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(output)
    }

    async fn stop(&self, name: &str, grace_secs: i64) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(name, Some(StopContainerOptions { t: grace_secs }))
            .await
            .map_err(map_error)
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(map_error)
    }

    async fn list(&self, prefix: &str, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);
        let options = ListContainersOptions {
            all,
            filters,
            ..Default::default()
        };

        let rows = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        let summaries = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id?;
                let name = row
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .next()?
                    .trim_start_matches('/')
                    .to_string();
                // Unknown creation time reads as "just now": never reclaimed by mistake
                let created_at = row
                    .created
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                    .unwrap_or_else(Utc::now);
                Some(ContainerSummary {
                    id,
                    name,
                    created_at,
                    state: row.state.unwrap_or_default(),
                })
            })
            .collect();

        Ok(retain_prefixed(summaries, prefix))
    }

    async fn stats(&self, id: &str) -> Result<StatsSample, RuntimeError> {
        // one_shot=false makes the daemon take two samples, so precpu is populated
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = Box::pin(self.docker.stats(id, Some(options)));
        let stats = match stream.next().await {
            Some(frame) => frame.map_err(map_error)?,
            None => return Err(RuntimeError::NotFound(format!("no stats for {id}"))),
        };

        let online_cpus = stats
            .cpu_stats
            .online_cpus
            .or_else(|| {
                stats
                    .cpu_stats
                    .cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map(|per_cpu| per_cpu.len() as u64)
            })
            .unwrap_or(1);

        Ok(StatsSample {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus,
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }
}
