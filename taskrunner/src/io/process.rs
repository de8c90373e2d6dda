//! Child processes with timeouts and bounded output.
//!
//! Agents, verification checks and `shell:` stages all run through
//! [`run_command_with_timeout`].

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

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
}

impl CommandOutput {
    /// Exited zero within the timeout.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Trailer noting discarded bytes, empty when nothing was cut.
    pub fn truncation_notice(&self, label: &str) -> String {
        let mut notice = String::new();
        for (stream, bytes) in [("stdout", self.stdout_truncated), ("stderr", self.stderr_truncated)] {
            if bytes > 0 {
                notice.push_str(&format!("\n[{label} {stream} truncated {bytes} bytes]\n"));
            }
        }
        notice
    }
}

/// Run `cmd`, optionally feeding `stdin`, and wait at most `timeout`.
///
/// Both pipes are drained on reader threads before stdin is written, so a
/// child that produces output while still reading its prompt cannot block.
/// At most `output_limit_bytes` per stream is kept; the rest is counted and
/// discarded. A timed-out child is killed and reported with `timed_out`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, program = ?cmd.get_program(), "spawn failed");
        anyhow!(err).context(format!("spawn {}", cmd.get_program().to_string_lossy()))
    })?;
    debug!(pid = child.id(), "child spawned");

    let stdout = child.stdout.take().context("stdout was not piped")?;
    let stderr = child.stderr.take().context("stderr was not piped")?;
    let stdout_reader = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut pipe = child.stdin.take().context("stdin was not piped")?;
        match pipe.write_all(input) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                warn!("child closed stdin before reading all input");
            }
            Err(err) => return Err(err).context("write stdin"),
        }
    }

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "timed out, killing child");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_reader).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_reader).context("join stderr")?;
    if stdout_truncated + stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "output truncated");
    }
    debug!(exit_code = ?status.code(), timed_out, "child finished");

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader` to EOF, keeping the first `limit` bytes.
fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
}

/// `sh -c <script>` rooted at `workdir`.
pub fn shell_command(script: &str, workdir: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).current_dir(workdir);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("printf out; printf err >&2; exit 3", temp.path());
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(10), 1_000).expect("run");
        assert_eq!(output.stdout_text(), "out");
        assert_eq!(output.stderr_text(), "err");
        assert_eq!(output.status.code(), Some(3));
        assert!(!output.succeeded());
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("printf 0123456789", temp.path());
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(10), 4).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.truncation_notice("agent").contains("stdout truncated 6 bytes"));
    }

    #[test]
    fn feeds_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("cat", temp.path());
        let output = run_command_with_timeout(cmd, Some(b"prompt"), Duration::from_secs(10), 100)
            .expect("run");
        assert_eq!(output.stdout_text(), "prompt");
        assert!(output.succeeded());
    }

    #[test]
    fn kills_on_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("exec sleep 5", temp.path());
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(200), 100).expect("run");
        assert!(output.timed_out);
        assert!(!output.succeeded());
    }
}
