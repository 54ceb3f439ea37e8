//! In-memory container runtime for tests
//!
//! Behaves like a tiny daemon: containers are created, started, waited on
//! and removed in a map, so tests can assert the container count before
//! and after an execution without Docker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::RuntimeError;
use crate::runtime::{
    CapturedOutput, ContainerRuntime, ContainerSpec, ContainerSummary, StatsSample,
};

/// What every started container "does"
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// How long the program runs; `None` never exits on its own
    pub runs_for: Option<Duration>,
}

impl ScriptedRun {
    pub fn exits(exit_code: i64, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            runs_for: Some(Duration::ZERO),
        }
    }

    pub fn hangs() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            runs_for: None,
        }
    }
}

impl Default for ScriptedRun {
    fn default() -> Self {
        Self::exits(0, "", "")
    }
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    created_at: DateTime<Utc>,
    state: String,
    stdin: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    next_id: u64,
    script: ScriptedRun,
    specs: Vec<ContainerSpec>,
    pulled: Vec<String>,
    stats: HashMap<String, StatsSample>,
    unavailable: bool,
    fail_create: Option<RuntimeError>,
    fail_start: Option<RuntimeError>,
    fail_remove: Option<RuntimeError>,
    /// Create registers the container but still reports failure
    create_leaks: bool,
    /// Start never returns once it has stdin to write
    stdin_blocks: bool,
}

/// Scriptable stand-in for the Docker daemon
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: ScriptedRun) -> Self {
        let runtime = Self::default();
        runtime.lock().script = script;
        runtime
    }

    /// Every call fails as if the socket were gone
    pub fn unavailable() -> Self {
        let runtime = Self::default();
        runtime.lock().unavailable = true;
        runtime
    }

    pub fn fail_create(&self, err: RuntimeError) {
        self.lock().fail_create = Some(err);
    }

    /// Create fails after the daemon already registered the container
    pub fn fail_create_after_register(&self, err: RuntimeError) {
        let mut state = self.lock();
        state.fail_create = Some(err);
        state.create_leaks = true;
    }

    pub fn fail_start(&self, err: RuntimeError) {
        self.lock().fail_start = Some(err);
    }

    pub fn fail_remove(&self, err: RuntimeError) {
        self.lock().fail_remove = Some(err);
    }

    /// Make stdin writes hang, like a full pipe to a program that never reads
    pub fn block_stdin(&self) {
        self.lock().stdin_blocks = true;
    }

    /// Plant a container directly, e.g. a leftover from a crashed process
    pub fn insert_container(&self, name: &str, created_at: DateTime<Utc>, state: &str) -> String {
        let mut guard = self.lock();
        let id = guard.allocate_id();
        guard.containers.insert(
            name.to_string(),
            MockContainer {
                id: id.clone(),
                created_at,
                state: state.to_string(),
                stdin: None,
            },
        );
        id
    }

    pub fn set_stats(&self, id: &str, sample: StatsSample) {
        self.lock().stats.insert(id.to_string(), sample);
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().containers.contains_key(name)
    }

    pub fn state_of(&self, name: &str) -> Option<String> {
        self.lock().containers.get(name).map(|c| c.state.clone())
    }

    /// Specs passed to `create`, oldest first
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.lock().specs.clone()
    }

    pub fn stdin_of(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().containers.get(name).and_then(|c| c.stdin.clone())
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), RuntimeError> {
        if self.lock().unavailable {
            Err(RuntimeError::Unavailable(
                "connect: no such file or directory".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl MockState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", self.next_id)
    }

    /// Map key for a container given its name or id, as the daemon accepts both
    fn resolve(&self, name_or_id: &str) -> Result<String, RuntimeError> {
        if self.containers.contains_key(name_or_id) {
            return Ok(name_or_id.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.id == name_or_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name_or_id}")))
    }

    fn container(&mut self, name_or_id: &str) -> Result<&mut MockContainer, RuntimeError> {
        let key = self.resolve(name_or_id)?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name_or_id}")))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.check_available()
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.check_available()?;
        self.lock().pulled.push(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.check_available()?;
        let mut state = self.lock();
        state.specs.push(spec.clone());

        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("Conflict. The container name {} is already in use", spec.name),
            });
        }

        if let Some(err) = state.fail_create.clone() {
            if !state.create_leaks {
                return Err(err);
            }
        }

        let id = state.allocate_id();
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                created_at: Utc::now(),
                state: "created".to_string(),
                stdin: None,
            },
        );

        match state.fail_create.clone() {
            Some(err) => Err(err),
            None => Ok(id),
        }
    }

    async fn start(&self, name: &str, stdin: Option<Vec<u8>>) -> Result<(), RuntimeError> {
        self.check_available()?;
        let blocks = {
            let mut state = self.lock();
            if let Some(err) = state.fail_start.clone() {
                return Err(err);
            }
            let blocks = state.stdin_blocks && stdin.is_some();
            let container = state.container(name)?;
            container.state = "running".to_string();
            container.stdin = stdin;
            blocks
        };

        if blocks {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        self.check_available()?;
        let script = {
            let mut state = self.lock();
            state.container(name)?;
            state.script.clone()
        };

        match script.runs_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }

        let mut state = self.lock();
        let container = state.container(name)?;
        container.state = "exited".to_string();
        Ok(script.exit_code)
    }

    async fn logs(&self, name: &str, limit: usize) -> Result<CapturedOutput, RuntimeError> {
        self.check_available()?;
        let mut state = self.lock();
        state.container(name)?;
        let mut output = CapturedOutput::default();
        output.push_stdout(&state.script.stdout, limit);
        output.push_stderr(&state.script.stderr, limit);
        Ok(output)
    }

    async fn stop(&self, name: &str, _grace_secs: i64) -> Result<(), RuntimeError> {
        self.check_available()?;
        let mut state = self.lock();
        let container = state.container(name)?;
        if container.state != "running" {
            return Err(RuntimeError::NotModified(format!("{name} is not running")));
        }
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.check_available()?;
        let mut state = self.lock();
        if let Some(err) = state.fail_remove.clone() {
            return Err(err);
        }
        let key = state.resolve(name)?;
        state.containers.remove(&key);
        Ok(())
    }

    async fn list(&self, prefix: &str, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.check_available()?;
        let state = self.lock();
        let mut rows: Vec<ContainerSummary> = state
            .containers
            .iter()
            .filter(|(name, c)| name.starts_with(prefix) && (all || c.state == "running"))
            .map(|(name, c)| ContainerSummary {
                id: c.id.clone(),
                name: name.clone(),
                created_at: c.created_at,
                state: c.state.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn stats(&self, id: &str) -> Result<StatsSample, RuntimeError> {
        self.check_available()?;
        self.lock()
            .stats
            .get(id)
            .copied()
            .ok_or_else(|| RuntimeError::NotFound(format!("no stats for {id}")))
    }
}
