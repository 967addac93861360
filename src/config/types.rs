use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeboxConfig {
    pub sandbox: SandboxConfig,
    pub docker: DockerConfig,
    pub fallback: FallbackConfig,
}

/// The type of execution backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Docker container sandbox
    Docker,
    /// Unisolated host execution (degraded mode)
    Fallback,
    /// Use Docker when reachable, otherwise fall back
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Timeout applied when a request asks for 0 seconds
    pub default_timeout_seconds: u64,
    /// Requests above this are clamped
    pub max_timeout_seconds: u64,
    /// Run unisolated when Docker is unreachable (default: true).
    /// When disabled, every execution reports the substrate as unavailable.
    pub allow_fallback: bool,
    /// Cap applied to each of stdout and stderr
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            default_timeout_seconds: 10,
            max_timeout_seconds: 60,
            allow_fallback: true,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker CLI binary (default: docker)
    pub binary: String,
    /// Upper bound on `docker rm -f` after a timeout or failure
    pub teardown_timeout_seconds: u64,
    /// Image overrides keyed by language name (e.g. python = "python:3.12-slim")
    pub images: HashMap<String, String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            teardown_timeout_seconds: 10,
            images: HashMap::new(),
        }
    }
}

/// Fallback executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Apply host rlimits and a scrubbed environment to fallback runs (Unix only)
    pub apply_rlimits: bool,
    /// Shell used to interpret the profile command
    pub shell: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            apply_rlimits: true,
            shell: "sh".to_string(),
        }
    }
}
