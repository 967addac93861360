mod backends;
mod executor;
mod factory;
pub mod language;
mod outcome;
pub mod policy;
mod traits;

use std::time::Duration;

use serde::{Serialize, Serializer};

pub use backends::{DockerRuntime, FallbackExecutor};
pub use executor::{ExecutorMode, SandboxedExecutor};
pub use factory::{available_backends, create_executor, BackendInfo};
pub use language::{Language, LanguageProfile};
pub use outcome::{ResultNormalizer, RunOutcome};
pub use policy::ResourcePolicy;
pub use traits::{IsolationRuntime, ProcessOutput, RunSpec};

/// Timeout used when a request does not specify one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Exit code reported when an execution is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// One submission to execute. Lives only for the duration of a call.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    /// Free-form language name; unknown values run as Python.
    pub language: String,
    pub stdin_payload: String,
    pub timeout_seconds: u64,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            language: language.into(),
            stdin_payload: String::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn with_stdin(mut self, stdin_payload: impl Into<String>) -> Self {
        self.stdin_payload = stdin_payload.into();
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// The only value the sandbox ever hands back, whichever path ran the code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// True only when the code ran inside the isolation runtime.
    pub sandboxed: bool,
    /// Set when the process did not exit cleanly (non-zero exit or timeout).
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secs"
    )]
    pub execution_time: Option<Duration>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

fn serialize_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_f64(duration.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
