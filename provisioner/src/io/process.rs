//! Child process execution with timeouts and bounded output capture.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured result of one command invocation.
#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Bytes dropped beyond the capture limit (pipes are still drained).
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Short diagnostic for reports: exit code plus the tail of stderr
    /// (falling back to stdout when stderr is empty).
    pub fn diagnostic(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let stream = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let tail = tail_lines(stream, 5);
        match self.status.code() {
            Some(code) if tail.is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {tail}"),
            None => format!("killed by signal: {tail}"),
        }
    }
}

/// Build a `Command` from an argv-style vector.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let program = argv
        .first()
        .ok_or_else(|| anyhow!("empty command line"))?;
    let mut cmd = Command::new(program);
    cmd.args(&argv[1..]);
    Ok(cmd)
}

/// Run `cmd` to completion, killing it after `timeout`.
///
/// Stdout and stderr are drained on dedicated threads so a chatty child can
/// never deadlock on a full pipe; at most `output_limit_bytes` of each
/// stream is retained.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ExecOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || drain_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || drain_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_handle).context("join stdout reader")?;
    let (stderr, stderr_dropped) = join_reader(stderr_handle).context("join stderr reader")?;
    let truncated_bytes = stdout_dropped + stderr_dropped;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "command output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ExecOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        truncated_bytes,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            dropped += n - keep;
        } else {
            dropped += n;
        }
    }

    Ok((buf, dropped))
}

fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.trim_end().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ").trim().to_string()
}
