// Helper functions for backend implementations

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::{timeout, Duration};

use super::errors::{DownloadError, Result};

/// Run command with timeout, collecting stdout and stderr
pub async fn run_output_with_timeout(
    program: &Path,
    args: &[String],
    timeout_secs: u64,
) -> Result<std::process::Output> {
    let mut child = tool_command(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::Parse(format!("no stdout from {}", program.display())))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::Parse(format!("no stderr from {}", program.display())))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = join_pipe(stdout_task).await?;
            let stderr = join_pipe(stderr_task).await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            kill_process_group(&mut child).await;
            stdout_task.abort();
            stderr_task.abort();
            tracing::warn!(program = %program.display(), timeout_secs, "command timed out");
            Err(DownloadError::Extraction(format!(
                "{} timed out after {}s",
                program.display(),
                timeout_secs
            )))
        }
    }
}

/// Command for an external tool, placed in its own process group on unix
///
/// The terminal's Ctrl-C then reaches only us, and a stop can take down the
/// tool together with the helpers it spawned (ffmpeg).
pub fn tool_command(program: &Path) -> TokioCommand {
    #[allow(unused_mut)]
    let mut cmd = std::process::Command::new(program);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    TokioCommand::from(cmd)
}

/// Kill a child started by `tool_command` along with its process group
pub async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: kill(2) only sends a signal; the group id is the child's pid
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "child already gone");
    }
}

async fn join_pipe(task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    task.await
        .map_err(|e| DownloadError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(DownloadError::Io)
}

/// Map a spawn failure; a missing binary gets its own variant
pub fn spawn_error(program: &Path, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.display().to_string())
    } else {
        DownloadError::Io(e)
    }
}

/// Find yt-dlp executable in common paths, then on PATH
pub fn find_ytdlp() -> PathBuf {
    let common_paths = [
        "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
        "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac
        "/usr/bin/yt-dlp",          // System installation
    ];

    for path in common_paths {
        if Path::new(path).exists() {
            return PathBuf::from(path);
        }
    }

    // Last resort: hope the OS finds it at spawn time
    which::which("yt-dlp").unwrap_or_else(|_| PathBuf::from("yt-dlp"))
}

/// Directory downloads land in when the user did not choose one
pub fn default_destination_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}
