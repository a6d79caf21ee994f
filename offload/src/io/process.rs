//! Bounded child process execution for dry runs.
//!
//! Every spawned child is owned by a [`ChildGuard`] that kills and reaps it on
//! drop, so no early return (including error paths) leaves a process behind.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// SHA-256 hex over every stdout byte, including the truncated tail.
    pub stdout_sha256: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Exit code, or `None` when the child was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Owns a child process until it has been waited on.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let status = self
            .child
            .wait_timeout(timeout)
            .context("wait for command")?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    fn kill_and_wait(&mut self) -> Result<ExitStatus> {
        kill_process_group(self.child.id());
        // The child may exit between the timeout and the kill; that is fine.
        if let Err(err) = self.child.kill() {
            debug!(err = %err, "kill after timeout failed");
        }
        let status = self.child.wait().context("wait command after kill")?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!(pid = self.child.id(), "reaping abandoned child process");
        kill_process_group(self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Kill every process in the group led by `pid` so grandchildren cannot keep
/// the output pipes open.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let result = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = result {
        debug!(pid, err = %err, "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Run a command with a timeout, with stdin closed, capturing stdout/stderr
/// without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes`
/// bounds what is kept in memory per stream; the rest is drained, counted, and
/// still hashed. A timed-out child is killed and reported with
/// `timed_out = true`. Once the direct child exits, whatever is left of its
/// process group is killed so background jobs cannot hold the pipes open.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Lead a fresh process group so a timeout can take down the whole tree.
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => ChildGuard::new(child),
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            child.kill_and_wait()?
        }
    };
    kill_process_group(child.child.id());

    let stdout = join_output(stdout_handle).context("join stdout")?;
    let stderr = join_output(stderr_handle).context("join stderr")?;
    let elapsed = started.elapsed();
    let (stdout_truncated, stderr_truncated) = (stdout.truncated, stderr.truncated);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_sha256: stdout.sha256,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

/// One drained stream: the kept prefix, the dropped byte count, and a digest
/// of the whole stream.
struct StreamCapture {
    kept: Vec<u8>,
    truncated: usize,
    sha256: String,
}

fn join_output(handle: thread::JoinHandle<Result<StreamCapture>>) -> Result<StreamCapture> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<StreamCapture> {
    let mut kept = Vec::new();
    let mut truncated = 0usize;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        let remaining = limit.saturating_sub(kept.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            kept.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok(StreamCapture {
        kept,
        truncated,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash(script: &str) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let output =
            run_command_with_timeout(bash("printf hello; exit 3"), Duration::from_secs(10), 1024)
                .expect("run");
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.exit_code(), Some(3));
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output =
            run_command_with_timeout(bash("printf 0123456789"), Duration::from_secs(10), 4)
                .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert_eq!(output.stdout_sha256, crate::core::hashing::sha256_hex(b"0123456789"));
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_command_with_timeout(bash("exec sleep 5"), Duration::from_millis(200), 1024)
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
        assert!(output.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_background_grandchildren() {
        let output = run_command_with_timeout(
            bash("sleep 5 & sleep 5; wait"),
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(output.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn exited_parent_does_not_wait_for_background_jobs() {
        let output = run_command_with_timeout(
            bash("sleep 8 &\nprintf hi"),
            Duration::from_secs(1),
            1024,
        )
        .expect("run");
        assert!(!output.timed_out);
        assert_eq!(output.exit_code(), Some(0));
        assert_eq!(output.stdout, b"hi");
        assert!(output.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("/nonexistent/offload-binary");
        assert!(run_command_with_timeout(cmd, Duration::from_secs(1), 16).is_err());
    }
}
