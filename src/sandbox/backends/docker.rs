use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::types::{DockerConfig, SandboxConfig};
use crate::error::{Result, SandboxError};
use crate::sandbox::backends::{
    exit_code_of, feed_stdin, read_output, timeout_message, Workspace,
};
use crate::sandbox::language::LanguageProfile;
use crate::sandbox::traits::{IsolationRuntime, ProcessOutput, RunSpec};
use crate::sandbox::TIMEOUT_EXIT_CODE;

/// Exit status the docker CLI uses when the daemon itself failed the run.
const DOCKER_RUN_FAILURE: i32 = 125;

/// Upper bound on the `docker info` availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Stderr prefixes the docker CLI itself writes when a run never started.
const DAEMON_ERROR_PREFIXES: [&str; 4] = [
    "docker: Error response from daemon",
    "Error response from daemon",
    "Unable to find image",
    "docker: invalid reference format",
];

/// Isolation runtime backed by the Docker CLI.
///
/// Every call runs in a fresh `docker run --rm` container that is never
/// reused. Availability is probed once in [`DockerRuntime::connect`].
pub struct DockerRuntime {
    binary: String,
    images: HashMap<String, String>,
    teardown_timeout: Duration,
    max_output_bytes: usize,
    available: bool,
}

impl DockerRuntime {
    /// Build a handle, probing the daemon. Never fails: an unreachable daemon
    /// yields a handle with `is_available() == false`.
    pub async fn connect(config: &DockerConfig) -> Self {
        let available = Self::probe(&config.binary).await;

        if available {
            info!(binary = %config.binary, "Docker runtime available");
        } else {
            warn!(binary = %config.binary, "Docker daemon is not accessible");
        }

        Self::with_availability(config, available)
    }

    /// Build a handle with a known availability, skipping the probe.
    pub fn with_availability(config: &DockerConfig, available: bool) -> Self {
        Self {
            binary: config.binary.clone(),
            images: config.images.clone(),
            teardown_timeout: Duration::from_secs(config.teardown_timeout_seconds.max(1)),
            max_output_bytes: SandboxConfig::default().max_output_bytes,
            available,
        }
    }

    /// Cap on the bytes kept from each of stdout and stderr.
    pub fn with_output_limit(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Check whether the Docker daemon answers `docker info`.
    pub async fn probe(binary: &str) -> bool {
        let status = Command::new(binary)
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(PROBE_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(binary = %binary, error = %e, "Failed to run docker info");
                false
            }
            Err(_) => {
                debug!(binary = %binary, "docker info timed out");
                false
            }
        }
    }

    /// Image for a profile, honoring configured overrides.
    pub fn image_for<'a>(&'a self, profile: &'a LanguageProfile) -> &'a str {
        self.images
            .get(profile.language.name())
            .map(String::as_str)
            .unwrap_or(profile.image)
    }

    fn run_command(
        &self,
        spec: &RunSpec<'_>,
        code_dir: &Path,
        container_name: &str,
    ) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run");
        cmd.args(["--name", container_name]);
        // Images are pre-built; never reach the network to pull one
        cmd.arg("--pull=never");
        cmd.args(spec.policy.docker_args(code_dir));

        if !spec.stdin_payload.is_empty() {
            cmd.arg("-i");
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let command = spec.profile.run_command(spec.policy.scratch_path);
        cmd.arg(self.image_for(spec.profile));
        cmd.args(["sh", "-c", command.as_str()]);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd
    }

    /// Force-remove a container. Used on timeout and failure paths, where
    /// `--rm` alone cannot be relied on.
    async fn remove_container(&self, container_name: &str) {
        let rm = Command::new(&self.binary)
            .args(["rm", "-f", container_name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.teardown_timeout, rm).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!(container = %container_name, "Container removed");
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                // Already gone via --rm
                if !stderr.contains("No such container") {
                    warn!(container = %container_name, error = %stderr.trim(), "Failed to remove container");
                }
            }
            Ok(Err(e)) => {
                warn!(container = %container_name, error = %e, "Failed to run docker rm");
            }
            Err(_) => {
                warn!(container = %container_name, "docker rm timed out");
            }
        }
    }
}

/// Whether a 125 exit came from the daemon rather than the submission.
///
/// The CLI reports its own failures before the container writes anything,
/// so only a stderr that starts with one of its messages counts.
fn is_daemon_failure(exit_code: i32, stderr: &str) -> bool {
    let stderr = stderr.trim_start();
    exit_code == DOCKER_RUN_FAILURE
        && DAEMON_ERROR_PREFIXES
            .iter()
            .any(|prefix| stderr.starts_with(prefix))
}

#[async_trait]
impl IsolationRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn run(&self, spec: RunSpec<'_>) -> Result<ProcessOutput> {
        if !self.available {
            return Err(SandboxError::BackendNotAvailable {
                backend: "docker".to_string(),
                reason: "Docker daemon is not accessible".to_string(),
            });
        }

        // Dropped at the end of this call on every path
        let workspace = Workspace::create(spec.profile.source_filename, spec.source_code)?;
        workspace.share_read_only()?;

        let container_name = format!("gradebox-{}", Uuid::new_v4().simple());
        let mut cmd = self.run_command(&spec, workspace.path(), &container_name);

        debug!(
            container = %container_name,
            language = %spec.profile.language,
            source_len = spec.source_code.len(),
            stdin_len = spec.stdin_payload.len(),
            timeout_secs = spec.timeout.as_secs(),
            "Launching container"
        );

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::ContainerError(format!("Failed to launch {}: {}", self.binary, e))
        })?;
        feed_stdin(&mut child, spec.stdin_payload);

        let max_output_bytes = self.max_output_bytes;
        let waited = tokio::time::timeout(spec.timeout, async {
            let (stdout, stderr) = read_output(&mut child, max_output_bytes).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;
        let elapsed = started.elapsed();

        let (status, stdout, stderr) = match waited {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                self.remove_container(&container_name).await;
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "docker CLI already exited");
                }
                return Err(SandboxError::Execution(format!(
                    "Failed to wait for container: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(
                    container = %container_name,
                    timeout_secs = spec.timeout.as_secs(),
                    "Execution timed out, removing container"
                );
                self.remove_container(&container_name).await;
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "docker CLI already exited");
                }
                return Ok(ProcessOutput {
                    stdout: String::new(),
                    stderr: timeout_message(spec.timeout),
                    exit_code: TIMEOUT_EXIT_CODE,
                    elapsed,
                    timed_out: true,
                });
            }
        };

        let stdout = stdout.into_text();
        let stderr = stderr.into_text();
        let exit_code = exit_code_of(&status);

        if is_daemon_failure(exit_code, &stderr) {
            self.remove_container(&container_name).await;
            return Err(SandboxError::ContainerError(stderr.trim().to_string()));
        }

        debug!(
            container = %container_name,
            exit_code = exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Container completed"
        );

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
            elapsed,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::language::Language;
    use crate::sandbox::policy::ResourcePolicy;

    fn runtime(available: bool) -> DockerRuntime {
        let mut config = DockerConfig::default();
        config
            .images
            .insert("python".to_string(), "registry.local/python:grading".to_string());
        DockerRuntime::with_availability(&config, available)
    }

    #[test]
    fn test_image_override() {
        let runtime = runtime(true);
        assert_eq!(
            runtime.image_for(&Language::Python.profile()),
            "registry.local/python:grading"
        );
        assert_eq!(runtime.image_for(&Language::C.profile()), "gcc:13");
    }

    #[test]
    fn test_run_command_layout() {
        let runtime = runtime(true);
        let profile = Language::Cpp.profile();
        let policy = ResourcePolicy::apply();
        let spec = RunSpec {
            source_code: "int main(){}",
            profile: &profile,
            policy: &policy,
            stdin_payload: "1 2\n",
            timeout: Duration::from_secs(5),
        };

        let cmd = runtime.run_command(&spec, Path::new("/tmp/gradebox-x"), "gradebox-test");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--pull=never".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/tmp/gradebox-x:/code:ro".to_string()));

        let image_idx = args.iter().position(|a| a == "gcc:13").unwrap();
        assert_eq!(&args[image_idx + 1..image_idx + 3], ["sh", "-c"]);
        assert_eq!(
            args[image_idx + 3],
            "g++ -O2 -std=c++17 -o /tmp/main main.cpp && /tmp/main"
        );
    }

    #[test]
    fn test_no_stdin_flag_without_payload() {
        let runtime = runtime(true);
        let profile = Language::Python.profile();
        let policy = ResourcePolicy::apply();
        let spec = RunSpec {
            source_code: "print(1)",
            profile: &profile,
            policy: &policy,
            stdin_payload: "",
            timeout: Duration::from_secs(5),
        };
        let cmd = runtime.run_command(&spec, Path::new("/tmp/x"), "gradebox-test");
        assert!(!cmd.as_std().get_args().any(|a| a == "-i"));
    }

    #[test]
    fn test_daemon_failure_detection() {
        assert!(is_daemon_failure(
            125,
            "docker: Error response from daemon: No such image: gcc:13."
        ));
        assert!(is_daemon_failure(
            125,
            "Unable to find image 'gcc:13' locally\ndocker: Error response from daemon: No such image"
        ));
        assert!(!is_daemon_failure(125, "student chose exit code 125"));
        assert!(!is_daemon_failure(1, "docker: Error response from daemon: oops"));
    }

    #[test]
    fn test_submission_cannot_pose_as_daemon_failure() {
        assert!(!is_daemon_failure(125, "docker: is my favourite word"));
        assert!(!is_daemon_failure(
            125,
            "partial answer\ndocker: Error response from daemon: fake"
        ));
        assert!(!is_daemon_failure(125, "Traceback: Unable to find image? no"));
    }

    #[tokio::test]
    async fn test_unavailable_runtime_refuses_to_run() {
        let runtime = runtime(false);
        let profile = Language::Python.profile();
        let policy = ResourcePolicy::apply();
        let spec = RunSpec {
            source_code: "print(1)",
            profile: &profile,
            policy: &policy,
            stdin_payload: "",
            timeout: Duration::from_secs(1),
        };
        let err = runtime.run(spec).await.unwrap_err();
        assert!(err.is_container_error());
    }

    #[tokio::test]
    async fn test_probe_missing_binary() {
        assert!(!DockerRuntime::probe("/nonexistent/gradebox-docker").await);
    }

    /// Stand-in for the docker CLI: logs each invocation, answers `info` and
    /// `rm`, and handles `run` with the given shell snippet. `$host` is the
    /// mounted workspace and `$last` the container command.
    #[cfg(unix)]
    struct StubDocker {
        dir: tempfile::TempDir,
    }

    #[cfg(unix)]
    impl StubDocker {
        const EXECUTE: &'static str = r#"cd "$host" && exec sh -c "$last""#;
        const DAEMON_FAILURE: &'static str =
            r#"echo "docker: Error response from daemon: No such image: bash:5.2." >&2; exit 125"#;

        fn new(run_body: &str) -> Self {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::tempdir().unwrap();
            let script = format!(
                r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
case "$1" in
  info|rm) exit 0 ;;
  run) ;;
  *) exit 1 ;;
esac
host=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-v" ]; then host="${{arg%%:*}}"; fi
  prev="$arg"
  last="$arg"
done
{}
"#,
                run_body
            );
            let binary = dir.path().join("docker");
            std::fs::write(&binary, script).unwrap();
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
            Self { dir }
        }

        async fn runtime(&self, max_output_bytes: usize) -> DockerRuntime {
            let config = DockerConfig {
                binary: self.dir.path().join("docker").to_string_lossy().to_string(),
                teardown_timeout_seconds: 5,
                ..DockerConfig::default()
            };
            // A freshly written script can briefly fail to exec with ETXTBSY
            for _ in 0..20 {
                if DockerRuntime::probe(&config.binary).await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let runtime = DockerRuntime::connect(&config)
                .await
                .with_output_limit(max_output_bytes);
            assert!(runtime.is_available());
            runtime
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn removed_container(&self) -> bool {
            self.calls()
                .iter()
                .any(|call| call.starts_with("rm -f gradebox-"))
        }

        /// Host directory mounted at /code by the last `run`.
        fn workspace(&self) -> std::path::PathBuf {
            let calls = self.calls();
            let run = calls.iter().rev().find(|c| c.starts_with("run ")).unwrap();
            let mut args = run.split_whitespace();
            args.find(|a| *a == "-v").unwrap();
            let mount = args.next().unwrap();
            std::path::PathBuf::from(mount.split(':').next().unwrap())
        }
    }

    #[cfg(unix)]
    async fn run_bash(
        runtime: &DockerRuntime,
        source_code: &str,
        stdin_payload: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput> {
        let profile = Language::Bash.profile();
        let policy = ResourcePolicy::apply();
        runtime
            .run(RunSpec {
                source_code,
                profile: &profile,
                policy: &policy,
                stdin_payload,
                timeout,
            })
            .await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stub_run_completes() {
        let stub = StubDocker::new(StubDocker::EXECUTE);
        let runtime = stub.runtime(1024).await;

        let output = run_bash(&runtime, "read x; echo \"got $x\"; exit 3", "42\n", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(output.stdout, "got 42\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.timed_out);
        assert!(!stub.removed_container());
        assert!(!stub.workspace().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stub_timeout_removes_container() {
        let stub = StubDocker::new(StubDocker::EXECUTE);
        let runtime = stub.runtime(1024).await;

        let started = Instant::now();
        let output = run_bash(&runtime, "sleep 5", "", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(output.stderr, "Execution timed out after 1 seconds");
        assert!(output.elapsed >= Duration::from_secs(1));
        assert!(stub.removed_container());
        assert!(!stub.workspace().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stub_daemon_failure_is_container_error() {
        let stub = StubDocker::new(StubDocker::DAEMON_FAILURE);
        let runtime = stub.runtime(1024).await;

        let err = run_bash(&runtime, "echo never", "", Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::ContainerError(ref m) if m.contains("No such image")));
        assert!(stub.removed_container());
        assert!(!stub.workspace().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stub_program_exit_125_is_not_container_error() {
        let stub = StubDocker::new(StubDocker::EXECUTE);
        let runtime = stub.runtime(1024).await;

        let output = run_bash(
            &runtime,
            "echo 'docker: is my favourite word' >&2; exit 125",
            "",
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 125);
        assert!(output.stderr.starts_with("docker: is my favourite word"));
        assert!(!stub.removed_container());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stub_output_is_capped_while_reading() {
        let stub = StubDocker::new(StubDocker::EXECUTE);
        let runtime = stub.runtime(2048).await;

        let output = run_bash(
            &runtime,
            "head -c 100000000 /dev/zero | tr '\\0' x",
            "",
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.ends_with("[output truncated]"));
        assert!(output.stdout.len() <= 2048 + "\n[output truncated]".len());
    }
}
