//! Vigil Sandbox - single-use containers for untrusted code
//!
//! Everything that touches the container daemon lives here: limit
//! translation, provisioning, the supervised run with its deadline race,
//! orphan reclamation and usage snapshots. The crate knows nothing about
//! languages; callers hand it an image, an argv and the code.

pub mod config;
pub mod docker;
pub mod error;
pub mod limits;
pub mod monitor;
pub mod provision;
pub mod reclaim;
pub mod runtime;
pub mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use config::{SandboxConfig, DEFAULT_CONTAINER_PREFIX};
pub use docker::DockerRuntime;
pub use error::{RuntimeError, SandboxError};
pub use limits::{parse_cpu, parse_memory, CpuShare, ResourceLimits, Ulimit};
pub use monitor::{ContainerUsage, ResourceMonitor};
pub use provision::{new_execution_id, Provisioner, SandboxInstance, Workload};
pub use reclaim::{OrphanReclaimer, ReclaimReport};
pub use runtime::{CapturedOutput, ContainerRuntime, ContainerSpec, ContainerSummary, StatsSample};
pub use supervisor::{CleanupReport, RawResult, SandboxState, Supervised, Supervisor};

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockRuntime, ScriptedRun};
