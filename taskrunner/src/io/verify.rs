//! Verification: configured test and lint commands gate item completion.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::io::agent::floor_char_boundary;
use crate::io::process::{run_command_with_timeout, shell_command};

/// One named check to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    /// `test` or `lint`.
    pub name: String,
    pub command: String,
    /// Only required checks decide the verdict.
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub workdir: PathBuf,
    pub checks: Vec<CheckSpec>,
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept per check.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub command: String,
    pub required: bool,
    pub status: CheckStatus,
    pub exit_code: Option<i32>,
    /// Spawn failure or timeout.
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

/// Verdict plus per-check detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub passed: bool,
    pub checks: Vec<CheckOutcome>,
}

impl VerifyReport {
    pub fn from_checks(checks: Vec<CheckOutcome>) -> Self {
        let passed = checks
            .iter()
            .filter(|c| c.required)
            .all(|c| c.status == CheckStatus::Passed);
        Self { passed, checks }
    }

    fn failed(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Failed)
    }

    /// Markdown feedback handed to the agent on the next attempt. Empty when
    /// the report passed.
    pub fn feedback(&self) -> String {
        if self.passed {
            return String::new();
        }
        let mut parts: Vec<String> = Vec::new();
        for check in self.failed() {
            parts.push(format!("## {} FAILED", check.name.to_uppercase()));
            parts.push(format!("Command:\n{}", check.command));
            if let Some(code) = check.exit_code {
                parts.push(format!("ExitCode: {code}"));
            }
            if let Some(error) = &check.error {
                parts.push(format!("Error: {error}"));
            }
            if !check.stderr.trim().is_empty() {
                parts.push(format!("Stderr (excerpt):\n{}", check.stderr));
            }
            if !check.stdout.trim().is_empty() {
                parts.push(format!("Stdout (excerpt):\n{}", check.stdout));
            }
            parts.push(String::new());
        }
        parts.join("\n")
    }

    /// One line per failed check: `test: <first line> | lint: <first line>`.
    pub fn summary(&self) -> String {
        self.failed()
            .map(|check| {
                let first = [check.error.as_deref(), Some(check.stderr.as_str()), Some(check.stdout.as_str())]
                    .into_iter()
                    .flatten()
                    .flat_map(str::lines)
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or("failed");
                format!("{}: {first}", check.name)
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Abstraction over verification backends.
pub trait Verifier {
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyReport>;
}

/// Runs each check through `sh -c` in the project root.
pub struct ShellVerifier;

impl Verifier for ShellVerifier {
    #[instrument(skip_all, fields(checks = request.checks.len()))]
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyReport> {
        let mut outcomes = Vec::with_capacity(request.checks.len());
        for check in &request.checks {
            info!(check = %check.name, command = %check.command, "running check");
            outcomes.push(run_check(check, request));
        }
        let report = VerifyReport::from_checks(outcomes);
        if !report.passed {
            warn!(summary = %report.summary(), "verification failed");
        }
        Ok(report)
    }
}

fn run_check(check: &CheckSpec, request: &VerifyRequest) -> CheckOutcome {
    let limit = request.output_limit_bytes;
    let cmd = shell_command(&check.command, &request.workdir);
    let mut outcome = CheckOutcome {
        name: check.name.clone(),
        command: check.command.clone(),
        required: check.required,
        status: CheckStatus::Failed,
        exit_code: None,
        error: None,
        stdout: String::new(),
        stderr: String::new(),
    };
    // Keep one extra byte so excerpts can tell truncated from exact.
    match run_command_with_timeout(cmd, None, request.timeout, limit.saturating_add(1)) {
        Ok(output) => {
            outcome.exit_code = output.status.code();
            outcome.stdout = excerpt(&output.stdout_text(), limit, output.stdout_truncated);
            outcome.stderr = excerpt(&output.stderr_text(), limit, output.stderr_truncated);
            if output.timed_out {
                outcome.error = Some(format!(
                    "timed out after {}s",
                    request.timeout.as_secs()
                ));
            } else if output.status.success() {
                outcome.status = CheckStatus::Passed;
            } else if outcome.exit_code.is_none() {
                outcome.error = Some("terminated by signal".to_string());
            }
        }
        Err(err) => outcome.error = Some(format!("{err:#}")),
    }
    outcome
}

/// Cut `text` to `limit` bytes with a trailer naming the total size.
fn excerpt(text: &str, limit: usize, dropped: usize) -> String {
    let total = text.len() + dropped;
    if total <= limit {
        return text.to_string();
    }
    let cut = floor_char_boundary(text, limit);
    format!("{}\n... (truncated, total {total} bytes)", &text[..cut])
}
