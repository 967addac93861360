use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::types::SandboxConfig;
use crate::sandbox::backends::FallbackExecutor;
use crate::sandbox::language;
use crate::sandbox::outcome::{ResultNormalizer, RunOutcome};
use crate::sandbox::policy::ResourcePolicy;
use crate::sandbox::traits::{IsolationRuntime, RunSpec};
use crate::sandbox::{ExecutionRequest, ExecutionResult};

/// Which path an executor routes every request through.
///
/// Decided once at construction and never re-probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Isolation runtime reachable; every run is sandboxed.
    Available,
    /// Isolation runtime unreachable; runs go to the fallback, if allowed.
    Unavailable,
}

/// Entry point of the sandbox: turns an [`ExecutionRequest`] into an
/// [`ExecutionResult`], whatever happens along the way.
///
/// Holds no per-call state, so one executor can serve concurrent calls.
pub struct SandboxedExecutor {
    runtime: Option<Arc<dyn IsolationRuntime>>,
    fallback: Option<FallbackExecutor>,
    mode: ExecutorMode,
    normalizer: ResultNormalizer,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl SandboxedExecutor {
    /// Build an executor around `runtime`. `fallback` is used only when the
    /// runtime reports itself unavailable; `None` disables unisolated runs.
    pub fn new(
        runtime: Option<Arc<dyn IsolationRuntime>>,
        fallback: Option<FallbackExecutor>,
        config: &SandboxConfig,
    ) -> Self {
        let mode = match &runtime {
            Some(runtime) if runtime.is_available() => ExecutorMode::Available,
            _ => ExecutorMode::Unavailable,
        };

        match (mode, &fallback) {
            (ExecutorMode::Available, _) => {
                info!(
                    runtime = runtime.as_ref().map(|r| r.name()).unwrap_or_default(),
                    "Sandboxed executor ready"
                );
            }
            (ExecutorMode::Unavailable, Some(_)) => {
                warn!("Isolation runtime unavailable: submissions will run UNSANDBOXED on the host");
            }
            (ExecutorMode::Unavailable, None) => {
                warn!("Isolation runtime unavailable and fallback disabled: every execution will fail");
            }
        }

        Self {
            runtime,
            fallback,
            mode,
            normalizer: ResultNormalizer::new(config.max_output_bytes),
            default_timeout: Duration::from_secs(config.default_timeout_seconds.max(1)),
            max_timeout: Duration::from_secs(config.max_timeout_seconds.max(1)),
        }
    }

    pub fn mode(&self) -> ExecutorMode {
        self.mode
    }

    /// Requested timeout, with 0 replaced by the default and large values clamped.
    pub fn effective_timeout(&self, timeout_seconds: u64) -> Duration {
        if timeout_seconds == 0 {
            return self.default_timeout;
        }
        Duration::from_secs(timeout_seconds).min(self.max_timeout)
    }

    /// Execute one request. Never fails: every error is reported in-band.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let timeout = self.effective_timeout(request.timeout_seconds);
        let started = Instant::now();

        let runtime = match (self.mode, &self.runtime) {
            (ExecutorMode::Available, Some(runtime)) => runtime,
            _ => return self.execute_degraded(request, timeout, started).await,
        };

        let profile = language::resolve(&request.language);
        let policy = ResourcePolicy::apply();

        debug!(
            runtime = runtime.name(),
            requested = %request.language,
            language = %profile.language,
            timeout_secs = timeout.as_secs(),
            "Executing submission"
        );

        let spec = RunSpec {
            source_code: &request.source_code,
            profile: &profile,
            policy: &policy,
            stdin_payload: &request.stdin_payload,
            timeout,
        };

        let outcome = RunOutcome::classify(runtime.run(spec).await);
        match &outcome {
            RunOutcome::Completed(output) if output.timed_out => {
                info!(timeout_secs = timeout.as_secs(), "Submission exceeded its timeout");
            }
            RunOutcome::Completed(_) => {}
            RunOutcome::ContainerError(message) => {
                warn!(error = %message, "Container error");
            }
            RunOutcome::GenericError(message) => {
                warn!(error = %message, "Execution error");
            }
        }

        self.normalizer.normalize(outcome, true, started.elapsed())
    }

    /// Convenience form of [`execute`](Self::execute) taking the fields directly.
    pub async fn execute_code(
        &self,
        source_code: &str,
        language: &str,
        stdin_payload: &str,
        timeout_seconds: u64,
    ) -> ExecutionResult {
        let request = ExecutionRequest::new(source_code, language)
            .with_stdin(stdin_payload)
            .with_timeout(timeout_seconds);
        self.execute(&request).await
    }

    async fn execute_degraded(
        &self,
        request: &ExecutionRequest,
        timeout: Duration,
        started: Instant,
    ) -> ExecutionResult {
        match &self.fallback {
            Some(fallback) => {
                fallback
                    .execute_unisolated(
                        &request.source_code,
                        &request.language,
                        &request.stdin_payload,
                        timeout,
                    )
                    .await
            }
            None => self.normalizer.normalize(
                RunOutcome::ContainerError(
                    "Isolation runtime is unavailable and fallback execution is disabled"
                        .to_string(),
                ),
                false,
                started.elapsed(),
            ),
        }
    }
}
