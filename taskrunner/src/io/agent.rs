//! Acting collaborators: the code-generation CLIs that work on an item.
//!
//! The [`Agent`] trait decouples the act stage from the backend. Tests use
//! scripted agents that record requests without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one act invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub item_id: String,
    /// 1-based act invocation count for the item.
    pub attempt: u32,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    pub prompt: String,
    /// Where the agent's stdout/stderr are written.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub extra_args: Vec<String>,
}

/// Abstraction over agent backends. `Err` means the invocation failed.
pub trait Agent {
    fn name(&self) -> &str;
    fn invoke(&self, request: &AgentRequest) -> Result<()>;
}

/// `codex exec --skip-git-repo-check --yolo -` with the prompt on stdin.
pub struct CodexAgent;

impl Agent for CodexAgent {
    fn name(&self) -> &str {
        "codex"
    }

    #[instrument(skip_all, fields(item = %request.item_id, attempt = request.attempt))]
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("--skip-git-repo-check")
            .arg("--yolo")
            .args(&request.extra_args)
            .arg("-")
            .current_dir(&request.workdir);
        run_agent(self.name(), cmd, Some(request.prompt.as_bytes()), request)
    }
}

/// `claude --dangerously-skip-permissions -p <prompt>`.
pub struct ClaudeAgent;

impl Agent for ClaudeAgent {
    fn name(&self) -> &str {
        "claude"
    }

    #[instrument(skip_all, fields(item = %request.item_id, attempt = request.attempt))]
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        let mut cmd = Command::new("claude");
        cmd.arg("--dangerously-skip-permissions")
            .args(&request.extra_args)
            .arg("-p")
            .arg(&request.prompt)
            .current_dir(&request.workdir);
        run_agent(self.name(), cmd, None, request)
    }
}

fn run_agent(name: &str, cmd: Command, stdin: Option<&[u8]>, request: &AgentRequest) -> Result<()> {
    info!(agent = name, workdir = %request.workdir.display(), "invoking agent");
    let output = run_command_with_timeout(cmd, stdin, request.timeout, request.output_limit_bytes)
        .with_context(|| format!("run {name}"))?;

    write_agent_log(&request.log_path, &output, request.output_limit_bytes)?;

    if output.timed_out {
        warn!(agent = name, timeout_secs = request.timeout.as_secs(), "agent timed out");
        return Err(anyhow!("{name} timed out after {}s", request.timeout.as_secs()));
    }
    if !output.status.success() {
        warn!(agent = name, exit_code = ?output.status.code(), "agent failed");
        return Err(anyhow!(
            "{name} exited with status {:?} (log: {})",
            output.status.code(),
            request.log_path.display()
        ));
    }
    debug!(agent = name, "agent completed");
    Ok(())
}

/// Per-attempt log path: `<logs>/<ITEM>-attempt-<n>.log`.
pub fn agent_log_path(logs_dir: &Path, item_id: &str, attempt: u32) -> PathBuf {
    logs_dir.join(format!("{item_id}-attempt-{attempt}.log"))
}

fn write_agent_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    let mut buf = format!("=== stdout ===\n{}", output.stdout_text());
    buf.push_str(&format!("\n=== stderr ===\n{}", output.stderr_text()));
    buf.push_str(&output.truncation_notice("agent"));
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }
    if buf.len() > output_limit {
        let cut = floor_char_boundary(&buf, output_limit);
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write agent log {}", path.display()))
}

/// Largest index `<= max` that falls on a char boundary.
pub(crate) fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    (0..=max).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0)
}
