//! Runs the test command against a materialized variant.
//!
//! The command runs in its own process group on a current-thread tokio
//! runtime. Whatever happens, the whole group is killed once the run is
//! over, so no stray process keeps writing into the variant directory.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime;
use tokio::time;

/// How long to wait for pipes to close and the child to be reaped after
/// the process group was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Captured result of one test command run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, absent when killed by a signal.
    pub return_code: Option<i32>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// Run `command` through `sh -c` in `cwd`.
///
/// `timeout` bounds the whole run, including reading output. If the shell
/// has not exited by then the run is reported as timed out. Processes left
/// behind by the shell are killed either way.
pub fn run_with_timeout(command: &str, cwd: &Path, timeout: Duration) -> io::Result<CommandOutput> {
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(command, cwd, timeout))
}

async fn run(command: &str, cwd: &Path, timeout: Duration) -> io::Result<CommandOutput> {
    let start = Instant::now();
    let deadline = time::Instant::now() + timeout;

    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = Command::from(cmd).kill_on_drop(true).spawn()?;
    let pgid = child.id();
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let mut status: Option<io::Result<ExitStatus>> = None;
    let _ = time::timeout_at(deadline, async {
        tokio::join!(
            async { status = Some(child.wait().await) },
            drain(&mut stdout_pipe, &mut stdout),
            drain(&mut stderr_pipe, &mut stderr),
        );
    })
    .await;
    let timed_out = status.is_none();
    let elapsed = start.elapsed();

    kill_group(pgid, &mut child);
    let _ = time::timeout(DRAIN_GRACE, async {
        tokio::join!(
            drain(&mut stdout_pipe, &mut stdout),
            drain(&mut stderr_pipe, &mut stderr),
        );
        if timed_out {
            let _ = child.wait().await;
        }
    })
    .await;

    let return_code = match status {
        Some(result) => result?.code(),
        None => None,
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        return_code,
        elapsed,
        timed_out,
    })
}

/// Append everything read from `pipe` to `buf` until EOF.
///
/// Safe to cancel: bytes read so far stay in `buf`, and a pipe that reached
/// EOF is dropped so the next call returns immediately.
async fn drain<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut Vec<u8>) {
    let Some(reader) = pipe.as_mut() else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    *pipe = None;
}

/// Kill the shell and every process it started.
#[cfg(unix)]
fn kill_group(pgid: Option<u32>, child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) {
        // ESRCH: the group is already gone.
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>, child: &mut Child) {
    let _ = child.start_kill();
}
