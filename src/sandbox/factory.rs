use std::sync::Arc;

use crate::config::types::{BackendType, GradeboxConfig};
use crate::error::{Result, SandboxError};
use crate::sandbox::backends::{DockerRuntime, FallbackExecutor};
use crate::sandbox::executor::SandboxedExecutor;
use crate::sandbox::outcome::ResultNormalizer;
use crate::sandbox::traits::IsolationRuntime;

/// Create an executor based on the configuration.
///
/// With `backend = "docker"` an unreachable daemon is an error, so operators
/// who require isolation find out at startup. With `auto` the executor is
/// built either way and its mode reflects what was found.
pub async fn create_executor(config: &GradeboxConfig) -> Result<SandboxedExecutor> {
    let fallback = || {
        FallbackExecutor::new(
            &config.fallback,
            ResultNormalizer::new(config.sandbox.max_output_bytes),
        )
    };

    match config.sandbox.backend {
        BackendType::Docker => {
            let runtime = DockerRuntime::connect(&config.docker)
                .await
                .with_output_limit(config.sandbox.max_output_bytes);
            if !runtime.is_available() {
                return Err(SandboxError::BackendNotAvailable {
                    backend: "docker".to_string(),
                    reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                        .to_string(),
                });
            }
            let runtime: Arc<dyn IsolationRuntime> = Arc::new(runtime);
            Ok(SandboxedExecutor::new(Some(runtime), None, &config.sandbox))
        }

        BackendType::Fallback => {
            if !config.sandbox.allow_fallback {
                return Err(SandboxError::Config(
                    "backend = \"fallback\" requires sandbox.allow_fallback = true".to_string(),
                ));
            }
            Ok(SandboxedExecutor::new(None, Some(fallback()), &config.sandbox))
        }

        BackendType::Auto => {
            let runtime = DockerRuntime::connect(&config.docker)
                .await
                .with_output_limit(config.sandbox.max_output_bytes);
            let runtime: Arc<dyn IsolationRuntime> = Arc::new(runtime);
            let fallback = config.sandbox.allow_fallback.then(fallback);
            Ok(SandboxedExecutor::new(Some(runtime), fallback, &config.sandbox))
        }
    }
}

/// Get information about available backends on this system.
pub async fn available_backends(config: &GradeboxConfig) -> Vec<BackendInfo> {
    let docker_available = DockerRuntime::probe(&config.docker.binary).await;

    vec![
        BackendInfo {
            name: "docker",
            available: docker_available,
            sandboxed: true,
            description: "Docker container sandbox",
            unavailable_reason: if docker_available {
                None
            } else {
                Some("Docker daemon not accessible")
            },
        },
        BackendInfo {
            name: "fallback",
            available: config.sandbox.allow_fallback,
            sandboxed: false,
            description: "Unisolated host execution (degraded mode)",
            unavailable_reason: if config.sandbox.allow_fallback {
                None
            } else {
                Some("Disabled by sandbox.allow_fallback")
            },
        },
    ]
}

/// Information about an execution backend.
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub sandboxed: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}
