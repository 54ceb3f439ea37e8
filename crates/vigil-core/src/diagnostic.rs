//! Request and diagnostic data model
//!
//! Every execution, whatever happened, comes back as one
//! [`ExecutionDiagnostic`]. Callers branch on data, not on error types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Used when a request doesn't name a timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// One matched security rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub pattern: String,
    pub severity: Severity,
}

/// Why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Blocked by the security screen; never ran
    SecurityRejection,
    /// Unknown language, empty source and the like
    InvalidRequest,
    /// Daemon, image or container creation problem
    Provisioning,
    Timeout,
    /// Ran and exited non-zero
    Runtime,
}

/// Loosely-typed options as they arrive from callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub language: String,
    /// `None` or 0 means the configured default
    pub timeout_ms: Option<u64>,
    pub inputs: Vec<String>,
    pub expected_output: Option<String>,
}

impl ExecutionOptions {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Default::default()
        }
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn input(mut self, line: impl Into<String>) -> Self {
        self.inputs.push(line.into());
        self
    }

    pub fn expect(mut self, output: impl Into<String>) -> Self {
        self.expected_output = Some(output.into());
        self
    }
}

/// A validated request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: Language,
    pub timeout_ms: u64,
    pub inputs: Vec<String>,
    pub expected_output: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            inputs: Vec::new(),
            expected_output: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    /// Inputs joined by newlines; `None` when there are none
    pub fn stdin(&self) -> Option<Vec<u8>> {
        if self.inputs.is_empty() {
            None
        } else {
            Some(self.inputs.join("\n").into_bytes())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDiagnostic {
    pub success: bool,
    /// -1 when no exit code could be determined
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub matches_expected: Option<bool>,
    pub execution_id: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub language: String,
    pub category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl ExecutionDiagnostic {
    /// A failure that never produced a process
    pub fn failure(
        execution_id: impl Into<String>,
        language: impl Into<String>,
        category: FailureCategory,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            errors: vec![error.into()],
            warnings: Vec::new(),
            suggestions: Vec::new(),
            matches_expected: None,
            execution_id: execution_id.into(),
            duration_ms: 0,
            timestamp: Utc::now(),
            language: language.into(),
            category: Some(category),
            violations: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
