//! Child-process plumbing shared by the FFmpeg-backed engines.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;

use videokit_common::error::{EngineError, EngineResult};

/// Whether `binary` can be launched (`<binary> -version` exits 0).
pub async fn binary_available(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Run a tool to completion and return its stdout.
///
/// A non-zero exit is reported with the tool's trimmed stderr.
pub(crate) async fn run_tool<I, S>(binary: &Path, args: I) -> EngineResult<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            EngineError::unavailable(format!("failed to start {}: {e}", binary.display()))
        })?;

    if !output.status.success() {
        return Err(EngineError::process(format!(
            "{} failed (status {}): {}",
            binary.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// Drain a child's stderr so it can never block on a full pipe.
pub(crate) fn drain_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let Some(mut stderr) = stderr else {
            return String::new();
        };
        let mut output = String::new();
        match stderr.read_to_string(&mut output).await {
            Ok(_) => output,
            Err(err) => format!("<failed to read stderr: {err}>"),
        }
    })
}

/// Collect a drained stderr, tolerating a failed reader task.
pub(crate) async fn collect_stderr(task: JoinHandle<String>) -> String {
    task.await
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
        .trim()
        .to_string()
}

/// Read up to `size` bytes, stopping early only at end of stream.
pub(crate) async fn read_chunk<R>(reader: &mut R, size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
