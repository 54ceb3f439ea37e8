//! Sandbox error types
//!
//! Two layers: `RuntimeError` is what the container daemon told us,
//! `SandboxError` is what went wrong with one execution.

use thiserror::Error;

/// Errors reported by a container runtime backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Daemon socket missing, connection refused, transport failure
    #[error("container daemon unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Target is already in the requested state (e.g. stopping a stopped container)
    #[error("not modified: {0}")]
    NotModified(String),

    /// Daemon answered with an error
    #[error("daemon error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RuntimeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }

    /// Errors that mean "nothing left to do" for stop/remove
    pub fn is_benign_for_cleanup(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_) | RuntimeError::NotModified(_))
    }
}

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Image, daemon or container creation problem; no container exists
    #[error("Provisioning failed: {0}")]
    Provisioning(RuntimeError),

    #[error("Failed to start sandbox: {0}")]
    Start(RuntimeError),

    #[error("Failed to wait for sandbox: {0}")]
    Wait(RuntimeError),

    #[error("Failed to collect output: {0}")]
    Logs(RuntimeError),

    /// Deadline fired before the container exited; it was killed
    #[error("Timeout after {timeout_ms}ms")]
    Timeout {
        timeout_ms: u64,
        stdout: String,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// True when the daemon itself could not be reached
    pub fn is_unavailable(&self) -> bool {
        match self {
            SandboxError::Provisioning(e)
            | SandboxError::Start(e)
            | SandboxError::Wait(e)
            | SandboxError::Logs(e) => e.is_unavailable(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = SandboxError::Timeout {
            timeout_ms: 500,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Timeout after 500ms");
        assert!(err.is_timeout());
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_unavailable_propagates() {
        let err = SandboxError::Provisioning(RuntimeError::Unavailable("socket".into()));
        assert!(err.is_unavailable());

        let err = SandboxError::Provisioning(RuntimeError::NotFound("python:3".into()));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_benign_cleanup_errors() {
        assert!(RuntimeError::NotFound("x".into()).is_benign_for_cleanup());
        assert!(RuntimeError::NotModified("x".into()).is_benign_for_cleanup());
        assert!(!RuntimeError::Unavailable("x".into()).is_benign_for_cleanup());
    }
}
