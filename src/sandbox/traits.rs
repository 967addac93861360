use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::sandbox::language::LanguageProfile;
use crate::sandbox::policy::ResourcePolicy;

/// Everything an isolation runtime needs for one execution.
#[derive(Debug, Clone, Copy)]
pub struct RunSpec<'a> {
    pub source_code: &'a str,
    pub profile: &'a LanguageProfile,
    pub policy: &'a ResourcePolicy,
    pub stdin_payload: &'a str,
    pub timeout: Duration,
}

/// Raw output of a process that ran to completion or was killed on timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// Handle to an isolation substrate (a container engine).
///
/// Availability is decided once when the handle is built. `run` must create a
/// fresh environment per call and remove it, along with any temporary files,
/// before returning on every path.
#[async_trait]
pub trait IsolationRuntime: Send + Sync {
    /// Returns the runtime name (e.g., "docker")
    fn name(&self) -> &str;

    /// Whether the substrate was reachable when this handle was built
    fn is_available(&self) -> bool;

    /// Run one submission under `spec.policy`, returning once the process
    /// exits or `spec.timeout` elapses.
    ///
    /// Errors are either container-level (`SandboxError::ContainerError`)
    /// or generic orchestration failures.
    async fn run(&self, spec: RunSpec<'_>) -> Result<ProcessOutput>;
}
