//! Execution engine - the one entry point
//!
//! screen -> provision -> supervise -> analyze. Every outcome, including
//! infrastructure failure, comes back as an [`ExecutionDiagnostic`].
//!
//! Fail closed: if the container daemon can't be reached the code does not
//! run. There is no host fallback and there won't be one.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_sandbox::{
    new_execution_id, ContainerRuntime, ContainerUsage, DockerRuntime, OrphanReclaimer,
    Provisioner, ReclaimReport, ResourceLimits, ResourceMonitor, RuntimeError, SandboxError,
    Supervisor, Workload,
};

use crate::analyzer::OutputAnalyzer;
use crate::config::EngineConfig;
use crate::diagnostic::{
    ExecutionDiagnostic, ExecutionOptions, ExecutionRequest, FailureCategory,
};
use crate::history::ExecutionHistory;
use crate::language::Language;
use crate::screen::{SecurityScreen, SecurityVerdict};

/// Only construction can fail; executions never return an error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid security rule: {0}")]
    Rules(#[from] regex::Error),

    #[error("Cannot create container daemon client: {0}")]
    Client(RuntimeError),
}

pub struct ExecutionEngine {
    config: EngineConfig,
    runtime: Arc<dyn ContainerRuntime>,
    screen: SecurityScreen,
    provisioner: Provisioner,
    supervisor: Supervisor,
    reclaimer: Arc<OrphanReclaimer>,
    monitor: ResourceMonitor,
    history: ExecutionHistory,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self, EngineError> {
        let screen = SecurityScreen::new(config.max_code_bytes)?;
        let sandbox = &config.sandbox;

        Ok(Self {
            screen,
            provisioner: Provisioner::new(runtime.clone(), sandbox.clone()),
            supervisor: Supervisor::new(runtime.clone(), sandbox.max_output_bytes),
            reclaimer: Arc::new(OrphanReclaimer::from_config(runtime.clone(), sandbox)),
            monitor: ResourceMonitor::new(runtime.clone(), sandbox.container_prefix.clone()),
            history: ExecutionHistory::new(config.history_limit),
            runtime,
            config,
        })
    }

    /// Engine backed by the local Docker daemon.
    ///
    /// Only builds the client; an unreachable daemon shows up per execution
    /// as a "Sandbox unavailable" diagnostic.
    pub fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime = DockerRuntime::connect().map_err(EngineError::Client)?;
        Self::new(config, Arc::new(runtime))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Is the daemon answering right now?
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.runtime.ping().await
    }

    /// Security screen only, nothing runs
    pub fn screen(&self, code: &str, language: Language) -> SecurityVerdict {
        self.screen.screen(code, language)
    }

    /// Run `code` with loosely-typed options
    pub async fn execute(&self, code: &str, options: &ExecutionOptions) -> ExecutionDiagnostic {
        let execution_id = new_execution_id();

        let language = match options.language.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                let diagnostic = ExecutionDiagnostic::failure(
                    execution_id,
                    options.language.trim(),
                    FailureCategory::InvalidRequest,
                    e.to_string(),
                )
                .with_suggestion("Use one of: python, javascript, typescript");
                self.history.record(&diagnostic);
                return diagnostic;
            }
        };

        let request = ExecutionRequest {
            code: code.to_string(),
            language,
            timeout_ms: self.config.effective_timeout_ms(options.timeout_ms),
            inputs: options.inputs.clone(),
            expected_output: options.expected_output.clone(),
        };

        self.run_with_id(execution_id, &request).await
    }

    /// Run an already-typed request
    pub async fn run(&self, request: &ExecutionRequest) -> ExecutionDiagnostic {
        self.run_with_id(new_execution_id(), request).await
    }

    async fn run_with_id(&self, execution_id: String, request: &ExecutionRequest) -> ExecutionDiagnostic {
        let started = Instant::now();
        let mut diagnostic = self.run_inner(&execution_id, request).await;
        diagnostic.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            execution_id = %execution_id,
            language = %request.language,
            success = diagnostic.success,
            exit_code = diagnostic.exit_code,
            category = ?diagnostic.category,
            duration_ms = diagnostic.duration_ms,
            "Execution finished"
        );

        self.history.record(&diagnostic);
        diagnostic
    }

    async fn run_inner(&self, execution_id: &str, request: &ExecutionRequest) -> ExecutionDiagnostic {
        let language = request.language;

        if request.code.trim().is_empty() {
            return ExecutionDiagnostic::failure(
                execution_id,
                language.as_str(),
                FailureCategory::InvalidRequest,
                "Empty source",
            );
        }

        let verdict = self.screen.screen(&request.code, language);
        if !verdict.allowed {
            return rejected(execution_id, language, verdict);
        }

        let timeout_ms = self.config.effective_timeout_ms(Some(request.timeout_ms));
        let profile = language.profile();
        let workload = Workload {
            execution_id: execution_id.to_string(),
            image: self.config.images.image_for(language).to_string(),
            command: profile.interpreter.iter().map(|s| s.to_string()).collect(),
            extension: profile.extension.to_string(),
            code: request.code.clone(),
            stdin: request.stdin(),
        };
        let limits = ResourceLimits::from_config(&self.config.sandbox);

        let instance = match self.provisioner.provision(workload, limits).await {
            Ok(instance) => instance,
            Err(e) => return infrastructure_failure(execution_id, language, &e),
        };

        let supervised = self
            .supervisor
            .run(instance, Duration::from_millis(timeout_ms))
            .await;

        let mut diagnostic = match &supervised.result {
            Ok(raw) => OutputAnalyzer::analyze(raw, request, execution_id, 0),
            Err(SandboxError::Timeout {
                timeout_ms,
                stdout,
                stderr,
            }) => {
                let mut diagnostic = ExecutionDiagnostic::failure(
                    execution_id,
                    language.as_str(),
                    FailureCategory::Timeout,
                    format!("Timeout after {timeout_ms}ms"),
                )
                .with_suggestion("Look for infinite loops, or reads from stdin that no input satisfies");
                diagnostic.stdout = stdout.clone();
                diagnostic.stderr = stderr.clone();
                diagnostic
            }
            Err(e) => infrastructure_failure(execution_id, language, e),
        };

        for error in &supervised.cleanup.errors {
            diagnostic.warnings.push(format!("Cleanup incomplete: {error}"));
        }

        diagnostic
    }

    /// One orphan sweep
    pub async fn reclaim_orphans(&self) -> ReclaimReport {
        self.reclaimer.reclaim().await
    }

    /// Background sweep every `interval`; abort the handle to stop it
    pub fn spawn_orphan_sweep(&self, interval: Duration) -> JoinHandle<()> {
        self.reclaimer.clone().spawn_periodic(interval)
    }

    pub async fn resource_snapshot(&self) -> Result<Vec<ContainerUsage>, RuntimeError> {
        self.monitor.snapshot().await
    }
}

fn rejected(execution_id: &str, language: Language, verdict: SecurityVerdict) -> ExecutionDiagnostic {
    let mut diagnostic = ExecutionDiagnostic::failure(
        execution_id,
        language.as_str(),
        FailureCategory::SecurityRejection,
        "Security check failed; code was not executed",
    );

    for violation in &verdict.violations {
        let detail = match violation.rule.as_str() {
            "empty_source" => "Empty source".to_string(),
            "max_size" => format!("Source exceeds the size limit ({})", violation.pattern),
            _ => format!("Blocked pattern `{}`: {}", violation.rule, violation.pattern),
        };
        diagnostic.errors.push(detail);
    }

    diagnostic.suggestions.push(
        "Remove filesystem, process, dynamic evaluation and credential usage from the code".to_string(),
    );
    diagnostic.violations = verdict.violations;

    warn!(
        execution_id = %execution_id,
        language = %language,
        violations = diagnostic.violations.len(),
        "Execution rejected by security screen"
    );
    diagnostic
}

fn infrastructure_failure(execution_id: &str, language: Language, err: &SandboxError) -> ExecutionDiagnostic {
    if err.is_unavailable() {
        warn!(execution_id = %execution_id, error = %err, "Sandbox unavailable, refusing to execute");
        return ExecutionDiagnostic::failure(
            execution_id,
            language.as_str(),
            FailureCategory::Provisioning,
            format!("Sandbox unavailable: {err}"),
        )
        .with_suggestion("Start the container daemon; code never runs outside a sandbox");
    }

    warn!(execution_id = %execution_id, error = %err, "Sandbox failure");
    ExecutionDiagnostic::failure(
        execution_id,
        language.as_str(),
        FailureCategory::Provisioning,
        err.to_string(),
    )
}
