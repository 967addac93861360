use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::types::FallbackConfig;
use crate::error::{Result, SandboxError};
use crate::sandbox::backends::{
    exit_code_of, feed_stdin, read_output, timeout_message, Workspace,
};
use crate::sandbox::language::{self, LanguageProfile};
use crate::sandbox::outcome::{ResultNormalizer, RunOutcome};
use crate::sandbox::traits::ProcessOutput;
use crate::sandbox::{ExecutionResult, TIMEOUT_EXIT_CODE};

/// Largest file a fallback process may write.
const FSIZE_LIMIT_BYTES: u64 = 16 * 1024 * 1024;

/// Open file descriptor ceiling for fallback processes.
const NOFILE_LIMIT: u64 = 256;

/// Runs submissions directly on the host when no isolation runtime exists.
///
/// This is a degraded mode. There is no network, filesystem or privilege
/// isolation; at most host rlimits, a scrubbed environment and a process
/// group that is killed on timeout. Every result it produces carries
/// `sandboxed = false`.
#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    shell: String,
    apply_rlimits: bool,
    normalizer: ResultNormalizer,
}

impl FallbackExecutor {
    pub fn new(config: &FallbackConfig, normalizer: ResultNormalizer) -> Self {
        Self {
            shell: config.shell.clone(),
            apply_rlimits: config.apply_rlimits,
            normalizer,
        }
    }

    /// Execute without isolation. Never fails; errors are reported in-band.
    pub async fn execute_unisolated(
        &self,
        source_code: &str,
        language: &str,
        stdin_payload: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        let profile = language::resolve(language);

        warn!(
            language = %profile.language,
            "Running submission WITHOUT sandbox isolation (fallback mode)"
        );

        let started = Instant::now();
        let outcome = RunOutcome::classify(
            self.run(source_code, &profile, stdin_payload, timeout).await,
        );
        self.normalizer.normalize(outcome, false, started.elapsed())
    }

    async fn run(
        &self,
        source_code: &str,
        profile: &LanguageProfile,
        stdin_payload: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput> {
        let workspace = Workspace::create(profile.source_filename, source_code)?;
        let build_dir = workspace.build_dir()?;
        let command = profile.run_command(&build_dir.to_string_lossy());

        let mut cmd = Command::new(&self.shell);
        cmd.args(["-c", command.as_str()]);
        cmd.current_dir(workspace.path());

        if stdin_payload.is_empty() {
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(Stdio::piped());
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        {
            // Own process group, so compiled children die with the shell
            cmd.process_group(0);

            if self.apply_rlimits {
                cmd.env_clear();
                cmd.env(
                    "PATH",
                    std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()),
                );
                cmd.env("HOME", workspace.path());
                cmd.env("LANG", "C.UTF-8");

                let cpu_seconds = timeout.as_secs() + 1;
                // SAFETY: the closure runs between fork and exec and only
                // calls getrlimit and setrlimit, which are async-signal-safe.
                unsafe {
                    cmd.pre_exec(move || apply_rlimits(cpu_seconds));
                }
            }
        }

        debug!(
            language = %profile.language,
            source_len = source_code.len(),
            stdin_len = stdin_payload.len(),
            "Spawning fallback process"
        );

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::Execution(format!("Failed to spawn {}: {}", self.shell, e))
        })?;
        let pid = child.id();
        feed_stdin(&mut child, stdin_payload);

        // Both pipes close once the shell has exited, unless something it
        // started still holds them
        let max_output_bytes = self.normalizer.max_output_bytes();
        let read = tokio::time::timeout(timeout, read_output(&mut child, max_output_bytes)).await;
        let elapsed = started.elapsed();

        // The shell is not reaped yet, so its pid still names our group
        kill_process_group(pid);

        match read {
            Ok(Ok((stdout, stderr))) => {
                let status = child.wait().await.map_err(|e| {
                    SandboxError::Execution(format!("Failed to wait for process: {}", e))
                })?;
                let exit_code = exit_code_of(&status);
                debug!(
                    exit_code = exit_code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    stdout_len = stdout.bytes.len(),
                    stderr_len = stderr.bytes.len(),
                    "Fallback process completed"
                );

                Ok(ProcessOutput {
                    stdout: stdout.into_text(),
                    stderr: stderr.into_text(),
                    exit_code,
                    elapsed,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => {
                reap(&mut child).await;
                Err(SandboxError::Execution(format!(
                    "Failed to read process output: {}",
                    e
                )))
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Fallback execution timed out");
                reap(&mut child).await;
                Ok(ProcessOutput {
                    stdout: String::new(),
                    stderr: timeout_message(timeout),
                    exit_code: TIMEOUT_EXIT_CODE,
                    elapsed,
                    timed_out: true,
                })
            }
        }
    }
}

#[cfg(unix)]
fn apply_rlimits(cpu_seconds: u64) -> std::io::Result<()> {
    let limits = [
        (libc::RLIMIT_CPU, cpu_seconds),
        (libc::RLIMIT_CORE, 0),
        (libc::RLIMIT_FSIZE, FSIZE_LIMIT_BYTES),
        (libc::RLIMIT_NOFILE, NOFILE_LIMIT),
    ];

    for (resource, value) in limits {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let value = within_hard_limit(value as libc::rlim_t, current.rlim_max);
        let limit = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        if unsafe { libc::setrlimit(resource, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

/// An unprivileged process may only lower its hard limit.
#[cfg(unix)]
fn within_hard_limit(wanted: libc::rlim_t, hard: libc::rlim_t) -> libc::rlim_t {
    wanted.min(hard)
}

async fn reap(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to reap fallback process");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // ESRCH when the group already exited is fine
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn executor() -> FallbackExecutor {
        FallbackExecutor::new(&FallbackConfig::default(), ResultNormalizer::default())
    }

    #[tokio::test]
    async fn test_runs_bash_submission() {
        let result = executor()
            .execute_unisolated("echo hello; echo oops >&2", "bash", "", Duration::from_secs(5))
            .await;
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "oops");
        assert_eq!(result.exit_code, 0);
        assert!(!result.sandboxed);
        assert_eq!(result.execution_time, None);
    }

    #[tokio::test]
    async fn test_delivers_stdin() {
        let result = executor()
            .execute_unisolated("read a b; echo $((a + b))", "sh", "2 40\n", Duration::from_secs(5))
            .await;
        assert_eq!(result.stdout, "42");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let result = executor()
            .execute_unisolated("echo bad >&2; exit 3", "bash", "", Duration::from_secs(5))
            .await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "bad");
        assert!(result.execution_time.is_some());
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let started = Instant::now();
        let result = executor()
            .execute_unisolated("while true; do :; done", "bash", "", Duration::from_secs(1))
            .await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.stderr.contains("timed out"));
        let elapsed = result.execution_time.unwrap();
        assert!(elapsed >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_environment_is_scrubbed() {
        std::env::set_var("GRADEBOX_TEST_SECRET", "hunter2");
        let result = executor()
            .execute_unisolated(
                "echo \"[${GRADEBOX_TEST_SECRET}]\"",
                "bash",
                "",
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(result.stdout, "[]");
    }

    #[tokio::test]
    async fn test_workspace_is_cleaned_up() {
        let result = executor()
            .execute_unisolated("pwd", "bash", "", Duration::from_secs(5))
            .await;
        let workdir = std::path::PathBuf::from(&result.stdout);
        assert!(workdir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("gradebox-"));
        assert!(!workdir.exists());
    }

    #[tokio::test]
    async fn test_large_output_is_capped_while_reading() {
        let executor = FallbackExecutor::new(&FallbackConfig::default(), ResultNormalizer::new(4096));
        let profile = language::resolve("bash");
        let output = executor
            .run(
                "head -c 200000000 /dev/zero | tr '\\0' x; echo done >&2",
                &profile,
                "",
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(!output.timed_out);
        assert!(output.stdout.ends_with("[output truncated]"));
        assert!(output.stdout.len() <= 4096 + "\n[output truncated]".len());
        assert_eq!(output.stderr, "done\n");

        let result = executor.normalizer.normalize(
            RunOutcome::Completed(output),
            false,
            Duration::ZERO,
        );
        assert_eq!(result.stdout.matches("[output truncated]").count(), 1);
    }

    #[tokio::test]
    async fn test_background_processes_die_with_the_run() {
        let result = executor()
            .execute_unisolated(
                "sleep 30 >/dev/null 2>&1 & echo $!",
                "bash",
                "",
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(result.exit_code, 0);
        let pid: libc::pid_t = result.stdout.parse().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid));
    }

    /// A killed orphan may linger as a zombie until its new parent reaps it.
    fn is_running(pid: libc::pid_t) -> bool {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[test]
    fn test_rlimits_stay_within_hard_limit() {
        assert_eq!(within_hard_limit(256, 128), 128);
        assert_eq!(within_hard_limit(256, libc::RLIM_INFINITY), 256);
        assert_eq!(within_hard_limit(0, 64), 0);

        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current) }, 0);
        assert!(within_hard_limit(NOFILE_LIMIT as libc::rlim_t, current.rlim_max) <= current.rlim_max);
    }

    #[tokio::test]
    async fn test_missing_shell_is_reported_in_band() {
        let config = FallbackConfig {
            shell: "/nonexistent/gradebox-sh".to_string(),
            ..FallbackConfig::default()
        };
        let result = FallbackExecutor::new(&config, ResultNormalizer::default())
            .execute_unisolated("echo hi", "bash", "", Duration::from_secs(5))
            .await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("Failed to spawn"));
        assert!(!result.sandboxed);
    }
}
