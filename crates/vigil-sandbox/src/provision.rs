//! Sandbox provisioning
//!
//! One execution, one container. The code is written to a host file that
//! is mounted read-only; the container gets no network, no capabilities,
//! a read-only root and tight ulimits. Nothing is started here.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::limits::ResourceLimits;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::supervisor::SandboxState;

/// Where the code file lives inside the container
pub const CONTAINER_WORKDIR: &str = "/sandbox";

pub const LABEL_MANAGED: &str = "vigil.managed";
pub const LABEL_EXECUTION_ID: &str = "vigil.execution-id";

/// `exec-<unix millis>-<9 lowercase alphanumerics>`
pub fn new_execution_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("exec-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Language-independent description of what to run
#[derive(Debug, Clone)]
pub struct Workload {
    pub execution_id: String,
    pub image: String,
    /// Interpreter argv; the code file path is appended
    pub command: Vec<String>,
    /// File extension without the dot
    pub extension: String,
    pub code: String,
    /// Bytes written to stdin after start; `None` leaves stdin closed
    pub stdin: Option<Vec<u8>>,
}

/// A created, not yet started, container plus its host-side code file
#[derive(Debug, Clone)]
pub struct SandboxInstance {
    pub id: String,
    pub container_name: String,
    pub container_id: String,
    pub code_file: PathBuf,
    pub limits: ResourceLimits,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    pub stdin: Option<Vec<u8>>,
}

pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
}

impl Provisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    /// Write the code file and create the container.
    ///
    /// On error nothing is left behind: the code file is deleted and any
    /// container the daemon registered before failing is removed.
    pub async fn provision(
        &self,
        workload: Workload,
        limits: ResourceLimits,
    ) -> Result<SandboxInstance, SandboxError> {
        let container_name = format!("{}{}", self.config.container_prefix, workload.execution_id);

        if self.config.pull_missing_images {
            self.runtime
                .ensure_image(&workload.image)
                .await
                .map_err(SandboxError::Provisioning)?;
        }

        let code_file = self.write_code_file(&workload).await?;
        let spec = self.container_spec(&container_name, &workload, &code_file, &limits);

        debug!(
            execution_id = %workload.execution_id,
            container = %container_name,
            image = %workload.image,
            "Creating sandbox container"
        );

        let container_id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.discard(&container_name, &code_file).await;
                return Err(SandboxError::Provisioning(e));
            }
        };

        info!(
            execution_id = %workload.execution_id,
            container = %container_name,
            memory_bytes = limits.memory_bytes,
            cpu_quota = limits.cpu.quota,
            "Sandbox provisioned"
        );

        Ok(SandboxInstance {
            id: workload.execution_id,
            container_name,
            container_id,
            code_file,
            limits,
            state: SandboxState::Created,
            created_at: Utc::now(),
            stdin: workload.stdin,
        })
    }

    async fn write_code_file(&self, workload: &Workload) -> Result<PathBuf, SandboxError> {
        tokio::fs::create_dir_all(&self.config.sandbox_dir).await?;
        // The daemon needs an absolute host path for the bind
        let dir = tokio::fs::canonicalize(&self.config.sandbox_dir).await?;
        let path = dir.join(format!("{}.{}", workload.execution_id, workload.extension));

        tokio::fs::write(&path, workload.code.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).await
            {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }
        }

        Ok(path)
    }

    fn container_spec(
        &self,
        name: &str,
        workload: &Workload,
        code_file: &Path,
        limits: &ResourceLimits,
    ) -> ContainerSpec {
        let file_name = code_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", workload.execution_id, workload.extension));
        let target = format!("{CONTAINER_WORKDIR}/{file_name}");

        let mut cmd = workload.command.clone();
        cmd.push(target.clone());

        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            "/tmp".to_string(),
            format!("rw,size={},noexec,nosuid", self.config.tmpfs_size),
        );

        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_EXECUTION_ID.to_string(), workload.execution_id.clone());

        ContainerSpec {
            name: name.to_string(),
            image: workload.image.clone(),
            cmd,
            working_dir: CONTAINER_WORKDIR.to_string(),
            env: vec![
                "NODE_ENV=production".to_string(),
                "PYTHONUNBUFFERED=1".to_string(),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
            ],
            binds: vec![format!("{}:{}:ro", code_file.display(), target)],
            tmpfs,
            labels,
            user: self.config.user.clone(),
            open_stdin: workload.stdin.is_some(),
            limits: limits.clone(),
        }
    }

    async fn discard(&self, container_name: &str, code_file: &Path) {
        if let Err(e) = self.runtime.remove(container_name).await {
            if !e.is_benign_for_cleanup() {
                warn!(container = %container_name, error = %e, "Failed to remove half-created container");
            }
        }
        if let Err(e) = tokio::fs::remove_file(code_file).await {
            warn!(path = %code_file.display(), error = %e, "Failed to delete code file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::mock::MockRuntime;
    use tempfile::TempDir;

    fn setup() -> (Arc<MockRuntime>, Provisioner, TempDir) {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let config = SandboxConfig {
            sandbox_dir: dir.path().to_path_buf(),
            ..SandboxConfig::default()
        };
        let provisioner = Provisioner::new(runtime.clone(), config);
        (runtime, provisioner, dir)
    }

    fn workload(stdin: Option<Vec<u8>>) -> Workload {
        Workload {
            execution_id: new_execution_id(),
            image: "python:3.12-alpine".to_string(),
            command: vec!["python3".to_string()],
            extension: "py".to_string(),
            code: "print('hi')".to_string(),
            stdin,
        }
    }

    fn limits() -> ResourceLimits {
        ResourceLimits::from_config(&SandboxConfig::default())
    }

    #[test]
    fn test_execution_id_format() {
        let id = new_execution_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "exec");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(new_execution_id(), new_execution_id());
    }

    #[tokio::test]
    async fn test_provision_builds_locked_down_spec() {
        let (runtime, provisioner, _dir) = setup();
        let instance = provisioner.provision(workload(None), limits()).await.unwrap();

        assert_eq!(instance.state, SandboxState::Created);
        assert!(instance.container_name.starts_with("vigil-sandbox-exec-"));
        assert!(runtime.contains(&instance.container_name));

        let spec = runtime.created_specs().pop().unwrap();
        let file = format!("/sandbox/{}.py", instance.id);
        assert_eq!(spec.cmd, vec!["python3".to_string(), file.clone()]);
        assert_eq!(spec.working_dir, "/sandbox");
        assert_eq!(spec.binds.len(), 1);
        assert!(spec.binds[0].ends_with(&format!("{file}:ro")));
        assert_eq!(spec.tmpfs["/tmp"], "rw,size=16m,noexec,nosuid");
        assert_eq!(spec.labels[LABEL_MANAGED], "true");
        assert_eq!(spec.labels[LABEL_EXECUTION_ID], instance.id);
        assert_eq!(spec.user.as_deref(), Some("65534:65534"));
        assert!(!spec.open_stdin);
        assert_eq!(runtime.pulled_images(), vec!["python:3.12-alpine".to_string()]);
    }

    #[tokio::test]
    async fn test_code_file_is_read_only() {
        let (_runtime, provisioner, _dir) = setup();
        let instance = provisioner.provision(workload(None), limits()).await.unwrap();

        let written = std::fs::read_to_string(&instance.code_file).unwrap();
        assert_eq!(written, "print('hi')");

        let perms = std::fs::metadata(&instance.code_file).unwrap().permissions();
        assert!(perms.readonly());
    }

    #[tokio::test]
    async fn test_stdin_opens_only_when_given() {
        let (runtime, provisioner, _dir) = setup();
        provisioner
            .provision(workload(Some(b"5\n".to_vec())), limits())
            .await
            .unwrap();
        assert!(runtime.created_specs().pop().unwrap().open_stdin);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_nothing_behind() {
        let (runtime, provisioner, dir) = setup();
        runtime.fail_create_after_register(RuntimeError::Api {
            status: 500,
            message: "boom".to_string(),
        });

        let err = provisioner.provision(workload(None), limits()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Provisioning(_)));
        assert_eq!(runtime.container_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_daemon() {
        let dir = TempDir::new().unwrap();
        let config = SandboxConfig {
            sandbox_dir: dir.path().to_path_buf(),
            ..SandboxConfig::default()
        };
        let provisioner = Provisioner::new(Arc::new(MockRuntime::unavailable()), config);

        let err = provisioner.provision(workload(None), limits()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
