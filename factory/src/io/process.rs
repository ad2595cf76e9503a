//! Bounded child process execution for build validation.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn stdout_lossy(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated)
    }

    pub fn stderr_lossy(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated)
    }
}

fn with_notice(bytes: &[u8], truncated: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[truncated {truncated} bytes]\n"));
    }
    text
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is closed. Output is read concurrently while the child runs;
/// `output_limit_bytes` bounds what is kept per stream (the rest is drained and
/// counted).
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
    let elapsed = started.elapsed();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_command_with_timeout(cmd, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(output.exit_code(), Some(3));
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 0123456789"]);
        let output = run_command_with_timeout(cmd, Duration::from_secs(10), 4).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.stdout_lossy().contains("[truncated 6 bytes]"));
    }

    #[test]
    fn slow_command_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command_with_timeout(cmd, Duration::from_millis(200), 1024).expect("run");
        assert!(output.timed_out);
        assert_eq!(output.exit_code(), None);
    }

    #[test]
    fn missing_program_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-program-xyz");
        assert!(run_command_with_timeout(cmd, Duration::from_secs(1), 16).is_err());
    }
}
