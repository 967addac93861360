mod docker;
mod fallback;

pub use docker::DockerRuntime;
pub use fallback::FallbackExecutor;

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tracing::debug;

use crate::error::Result;
use crate::sandbox::outcome::TRUNCATION_MARKER;

/// Read size used while draining output pipes.
const READ_CHUNK_BYTES: usize = 8192;

/// Call-scoped directory holding the submitted source file.
///
/// Removed when dropped, so every exit path of a run cleans it up.
pub(crate) struct Workspace {
    dir: TempDir,
    source_path: PathBuf,
}

impl Workspace {
    pub(crate) fn create(source_filename: &str, source_code: &str) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("gradebox-").tempdir()?;
        let source_path = dir.path().join(source_filename);
        std::fs::write(&source_path, source_code)?;

        Ok(Self { dir, source_path })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Make the directory readable by the unprivileged container user.
    pub(crate) fn share_read_only(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(self.dir.path(), std::fs::Permissions::from_mode(0o755))?;
            std::fs::set_permissions(&self.source_path, std::fs::Permissions::from_mode(0o644))?;
        }
        Ok(())
    }

    /// Create a writable scratch directory inside the workspace.
    pub(crate) fn build_dir(&self) -> Result<PathBuf> {
        let build = self.dir.path().join("build");
        std::fs::create_dir(&build)?;
        Ok(build)
    }
}

/// Write `payload` to the child's stdin in the background, then close it.
///
/// Runs detached so a process that never reads its input cannot stall the
/// wait on a full pipe.
pub(crate) fn feed_stdin(child: &mut Child, payload: &str) {
    if let Some(mut stdin) = child.stdin.take() {
        let payload = payload.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "Process closed stdin before reading all input");
            }
        });
    }
}

/// Output of one pipe, holding at most the configured number of bytes.
#[derive(Debug, Default)]
pub(crate) struct CappedOutput {
    pub(crate) bytes: Vec<u8>,
    pub(crate) truncated: bool,
}

impl CappedOutput {
    pub(crate) fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Drain `reader` to EOF, keeping at most `cap` bytes.
///
/// Bytes past the cap are read and discarded so the writer never blocks on
/// a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<CappedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut output = CappedOutput::default();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(output);
        }

        let keep = n.min(cap.saturating_sub(output.bytes.len()));
        output.bytes.extend_from_slice(&chunk[..keep]);
        if keep < n {
            output.truncated = true;
        }
    }
}

/// Read the child's stdout and stderr concurrently until both are closed.
///
/// The child is only borrowed, so callers can still kill and reap it when
/// this is cut short by a timeout.
pub(crate) async fn read_output(
    child: &mut Child,
    cap: usize,
) -> std::io::Result<(CappedOutput, CappedOutput)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout = async move {
        match stdout {
            Some(pipe) => read_capped(pipe, cap).await,
            None => Ok(CappedOutput::default()),
        }
    };
    let stderr = async move {
        match stderr {
            Some(pipe) => read_capped(pipe, cap).await,
            None => Ok(CappedOutput::default()),
        }
    };

    tokio::try_join!(stdout, stderr)
}

/// Exit code of a finished process; signals map to `128 + signal`.
pub(crate) fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

pub(crate) fn timeout_message(timeout: Duration) -> String {
    format!("Execution timed out after {} seconds", timeout.as_secs())
}
