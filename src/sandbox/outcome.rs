use std::time::Duration;

use crate::error::{Result, SandboxError};
use crate::sandbox::traits::ProcessOutput;
use crate::sandbox::ExecutionResult;

pub(crate) const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Every way a single execution can end.
#[derive(Debug)]
pub enum RunOutcome {
    /// The process exited or was killed on timeout.
    Completed(ProcessOutput),
    /// The isolated environment could not be created or run.
    ContainerError(String),
    /// Any other orchestration failure (temp files, unexpected responses).
    GenericError(String),
}

impl RunOutcome {
    pub fn classify(result: Result<ProcessOutput>) -> Self {
        match result {
            Ok(output) => RunOutcome::Completed(output),
            Err(err) if err.is_container_error() => RunOutcome::ContainerError(err.to_string()),
            Err(err) => RunOutcome::GenericError(err.to_string()),
        }
    }
}

impl From<SandboxError> for RunOutcome {
    fn from(err: SandboxError) -> Self {
        Self::classify(Err(err))
    }
}

/// Maps a [`RunOutcome`] onto the canonical [`ExecutionResult`] shape.
#[derive(Debug, Clone)]
pub struct ResultNormalizer {
    max_output_bytes: usize,
}

impl Default for ResultNormalizer {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl ResultNormalizer {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// `elapsed` is used for error outcomes, which carry no timing of their own.
    pub fn normalize(&self, outcome: RunOutcome, sandboxed: bool, elapsed: Duration) -> ExecutionResult {
        let (stdout, stderr, exit_code, elapsed, timed_out) = match outcome {
            RunOutcome::Completed(output) => (
                output.stdout,
                output.stderr,
                output.exit_code,
                output.elapsed,
                output.timed_out,
            ),
            RunOutcome::ContainerError(message) => (String::new(), message, 1, elapsed, false),
            RunOutcome::GenericError(message) => (String::new(), message, 1, elapsed, false),
        };

        let execution_time = if exit_code != 0 || timed_out {
            Some(elapsed)
        } else {
            None
        };

        ExecutionResult {
            stdout: self.clean(stdout),
            stderr: self.clean(stderr),
            exit_code,
            sandboxed,
            execution_time,
        }
    }

    fn clean(&self, mut text: String) -> String {
        if text.len() > self.max_output_bytes {
            let mut cut = self.max_output_bytes;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str(TRUNCATION_MARKER);
        }
        text.trim().to_string()
    }
}
