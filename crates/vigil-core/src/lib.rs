//! Vigil Core - screening, analysis and the execution entry point
//!
//! `vigil-sandbox` knows how to run a file in a locked-down container.
//! This crate knows what the file is: which language, whether it is
//! allowed to run at all, and what its output means.

pub mod analyzer;
pub mod config;
pub mod diagnostic;
pub mod engine;
pub mod history;
pub mod language;
pub mod screen;

pub use analyzer::OutputAnalyzer;
pub use config::{ConfigError, EngineConfig, ImageConfig};
pub use diagnostic::{
    ExecutionDiagnostic, ExecutionOptions, ExecutionRequest, FailureCategory, Severity, Violation,
};
pub use engine::{EngineError, ExecutionEngine};
pub use history::{ExecutionHistory, HistoryStats};
pub use language::{Language, UnsupportedLanguage};
pub use screen::{SecurityScreen, SecurityVerdict};
