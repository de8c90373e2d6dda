//! Run reports: the appended markdown progress log and the JSON summary of
//! the last run.
//!
//! These are product artifacts, written regardless of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{ErrorEntry, FailureRecord, RunRecord};
use crate::io::config::write_atomic;

const PROGRESS_HEADER: &str = "# Run log\n\n---\n";
const TABLE_DESCRIPTION_CHARS: usize = 30;
const TABLE_MESSAGE_CHARS: usize = 60;

/// Everything a run leaves behind for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    /// True when the run ended on a halt rather than running out of work.
    pub stopped: bool,
    pub stop_reason: Option<String>,
    pub iterations: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub records: Vec<RunRecord>,
    pub errors: Vec<ErrorEntry>,
    pub failures: Vec<FailureRecord>,
}

/// `Nms` below a second, `Ns` below a minute, `Nm Ns` otherwise.
pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    if ms < 60_000 {
        return format!("{}s", (ms + 500) / 1_000);
    }
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000 + 500) / 1_000;
    format!("{minutes}m {seconds}s")
}

fn cell(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('|', "\\|").replace('\n', " ")
}

/// Markdown section for one run.
pub fn render_progress_entry(summary: &RunSummary) -> String {
    let mut entry = format!("\n## {}\n\n", summary.started_at);
    if !summary.records.is_empty() || !summary.errors.is_empty() {
        entry.push_str("| Time | Item | Outcome | Duration | Note |\n");
        entry.push_str("|------|------|---------|----------|------|\n");
    }
    for record in &summary.records {
        entry.push_str(&format!(
            "| {} | [{}] {} | {} | {} | {} |\n",
            record.time,
            record.item_id,
            cell(&record.description, TABLE_DESCRIPTION_CHARS),
            record.outcome.as_str(),
            format_duration(record.duration_ms),
            cell(&record.note, TABLE_MESSAGE_CHARS),
        ));
    }
    for error in &summary.errors {
        entry.push_str(&format!(
            "| {} | {} | error | - | {} |\n",
            error.time,
            error.stage,
            cell(&error.message, TABLE_MESSAGE_CHARS),
        ));
    }
    let status = if summary.stopped { "Stopped" } else { "Completed" };
    entry.push_str(&format!(
        "\n**{status}** - total: {}, iterations: {}, done: {}, failed: {}, skipped: {}\n",
        format_duration(summary.duration_ms),
        summary.iterations,
        summary.completed,
        summary.failed,
        summary.skipped,
    ));
    if let Some(reason) = &summary.stop_reason {
        entry.push_str(&format!("\nReason: {}\n", reason.replace('\n', " ")));
    }
    entry.push_str("\n---\n");
    entry
}

/// Append this run's section to the progress log, creating it if needed.
pub fn append_progress(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let fresh = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    if fresh {
        file.write_all(PROGRESS_HEADER.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
    }
    file.write_all(render_progress_entry(summary).as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(())
}

/// Replace the JSON summary of the last run.
pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Outcome;

    fn summary() -> RunSummary {
        RunSummary {
            started_at: "2026-01-02 03:04:05".to_string(),
            finished_at: "2026-01-02 03:05:05".to_string(),
            duration_ms: 61_000,
            stopped: true,
            stop_reason: Some("item IMPL-2 failed".to_string()),
            iterations: 2,
            completed: 1,
            failed: 1,
            skipped: 0,
            records: vec![
                RunRecord {
                    time: "03:04:30".to_string(),
                    item_id: "IMPL-1".to_string(),
                    description: "a description that is clearly longer than thirty".to_string(),
                    outcome: Outcome::Done,
                    duration_ms: 1_500,
                    note: "commit: abc1234".to_string(),
                },
                RunRecord {
                    time: "03:05:00".to_string(),
                    item_id: "IMPL-2".to_string(),
                    description: "b | c".to_string(),
                    outcome: Outcome::Failed,
                    duration_ms: 20,
                    note: "test: boom".to_string(),
                },
            ],
            errors: vec![ErrorEntry {
                time: "03:05:01".to_string(),
                stage: "git".to_string(),
                message: "git push failed".to_string(),
            }],
            failures: Vec::new(),
        }
    }

    #[test]
    fn durations_render_by_magnitude() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1_500), "2s");
        assert_eq!(format_duration(61_000), "1m 1s");
    }

    #[test]
    fn entry_has_rows_errors_and_totals() {
        let entry = render_progress_entry(&summary());
        assert!(entry.contains("| 03:04:30 | [IMPL-1] a description that is clearly ... | done | 2s | commit: abc1234 |"));
        assert!(entry.contains("[IMPL-2] b \\| c | failed | 20ms"));
        assert!(entry.contains("| 03:05:01 | git | error | - | git push failed |"));
        assert!(entry.contains("**Stopped** - total: 1m 1s, iterations: 2, done: 1, failed: 1"));
        assert!(entry.contains("Reason: item IMPL-2 failed"));
    }

    #[test]
    fn progress_appends_under_one_header() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".taskrunner/progress.md");
        append_progress(&path, &summary()).expect("first");
        append_progress(&path, &summary()).expect("second");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.starts_with(PROGRESS_HEADER));
        assert_eq!(text.matches("# Run log").count(), 1);
        assert_eq!(text.matches("## 2026-01-02 03:04:05").count(), 2);
    }

    #[test]
    fn summary_json_is_replaced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("last_run.json");
        write_summary(&path, &summary()).expect("write");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["records"][1]["outcome"], "failed");
        assert_eq!(value["errors"][0]["stage"], "git");
    }
}
