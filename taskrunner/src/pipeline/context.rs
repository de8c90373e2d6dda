//! Shared run state passed to every stage.
//!
//! One `RunContext` exists per run and is owned by the engine. Each field
//! notes which stage writes it; everything else only reads.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;

use crate::core::catalog::Catalog;
use crate::core::graph::BlockedReport;
use crate::core::ids::IdScheme;
use crate::core::types::{ErrorEntry, FailureRecord, ItemStatus, Outcome, RunRecord, WorkItem};
use crate::io::config::{ConfigError, RunConfig};
use crate::io::verify::VerifyReport;

/// Characters of the item description kept in outcome rows.
const RECORD_DESCRIPTION_CHARS: usize = 40;

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Duplicate ids or a self-dependency in the checklist.
    Integrity(String),
    MissingReferences { item: String, missing: Vec<String> },
    Blocked(BlockedReport),
    /// Repair attempts exhausted under stop-on-failure.
    ItemFailed { item: String },
    /// A stage returned a halt signal.
    StageHalted { stage: String },
    /// A stage returned an error or panicked.
    StageFailed { stage: String, message: String },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integrity(message) => write!(f, "checklist integrity: {message}"),
            Self::MissingReferences { item, missing } => {
                write!(f, "{item} references unknown ids: {}", missing.join(", "))
            }
            Self::Blocked(report) => {
                write!(f, "{} pending items blocked", report.items.len())?;
                if let Some(cycle) = &report.cycle {
                    write!(f, " (cycle: {})", cycle.join(" -> "))?;
                } else if report.likely_cycle {
                    f.write_str(" (likely cycle)")?;
                }
                Ok(())
            }
            Self::ItemFailed { item } => write!(f, "{item} failed verification"),
            Self::StageHalted { stage } => write!(f, "stage '{stage}' requested halt"),
            Self::StageFailed { stage, message } => write!(f, "stage '{stage}' failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Iterate,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Iterate => "iterate",
            Self::Teardown => "teardown",
        })
    }
}

/// How the Setup/Iterate phases ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No pending work remains.
    Complete,
    /// Work remained after the last permitted iteration.
    IterationLimit { max_iterations: u32 },
    Halted { phase: Phase, reason: HaltReason },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::IterationLimit { max_iterations } => {
                write!(f, "iteration limit of {max_iterations} reached")
            }
            Self::Halted { phase, reason } => write!(f, "halted in {phase}: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Local wall-clock start, written by the init stage.
    pub started_at: Option<String>,
    pub started: Option<Instant>,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
}

#[derive(Debug)]
pub struct RunContext {
    pub root: PathBuf,
    pub config: RunConfig,
    pub scheme: IdScheme,
    /// Written by load-tasks and mark-done.
    pub catalog: Catalog,
    /// Index into `catalog.items`; written by select-next, cleared by
    /// mark-done or a discarded failure.
    pub current: Option<usize>,
    /// Name of the stage being dispatched; written by the engine.
    pub stage: String,
    /// Cleared by load-tasks or select-next when nothing is left.
    pub more_work: bool,
    /// Iterate passes so far; written by the engine.
    pub iterations: u32,
    /// Written by load-constraints.
    pub constraint_prompt: String,
    /// Written by the verify stage, cleared on pass.
    pub verification_feedback: String,
    pub last_verification: Option<VerifyReport>,
    /// Short sha of the last commit for the current item; written by git.
    pub last_commit: Option<String>,
    pub records: Vec<RunRecord>,
    pub errors: Vec<ErrorEntry>,
    pub failures: Vec<FailureRecord>,
    pub stats: RunStats,
    /// First halt cause; later ones are ignored.
    pub halt: Option<HaltReason>,
    /// Set by the engine before teardown.
    pub stop: Option<StopReason>,
    pub created: Instant,
}

impl RunContext {
    pub fn new(root: impl Into<PathBuf>, config: RunConfig) -> Result<Self, ConfigError> {
        let scheme = config.id_scheme()?;
        Ok(Self {
            root: root.into(),
            config,
            scheme,
            catalog: Catalog::default(),
            current: None,
            stage: String::new(),
            more_work: true,
            iterations: 0,
            constraint_prompt: String::new(),
            verification_feedback: String::new(),
            last_verification: None,
            last_commit: None,
            records: Vec::new(),
            errors: Vec::new(),
            failures: Vec::new(),
            stats: RunStats::default(),
            halt: None,
            stop: None,
            created: Instant::now(),
        })
    }

    /// Resolve a configured path against the project root.
    pub fn path(&self, configured: &Path) -> PathBuf {
        self.config.resolve(&self.root, configured)
    }

    pub fn current_item(&self) -> Option<&WorkItem> {
        self.current.and_then(|i| self.catalog.items.get(i))
    }

    pub fn current_item_mut(&mut self) -> Option<&mut WorkItem> {
        self.current.and_then(|i| self.catalog.items.get_mut(i))
    }

    /// Clear per-item retry state when a new item becomes current.
    pub fn reset_item_state(&mut self) {
        if let Some(item) = self.current_item_mut() {
            item.attempts = 0;
        }
        self.constraint_prompt.clear();
        self.verification_feedback.clear();
        self.last_verification = None;
        self.last_commit = None;
    }

    /// Record the first halt cause.
    pub fn halt_with(&mut self, reason: HaltReason) {
        if self.halt.is_none() {
            self.halt = Some(reason);
        }
    }

    pub fn record_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(ErrorEntry {
            time: clock_time(),
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    fn elapsed_ms(item: &WorkItem) -> u64 {
        item.selected_at
            .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Append an outcome row for the current item.
    pub fn record_outcome(&mut self, outcome: Outcome, note: impl Into<String>) {
        let Some(item) = self.current_item() else {
            return;
        };
        let record = RunRecord {
            time: clock_time(),
            item_id: item.id.clone(),
            description: item.short_description(RECORD_DESCRIPTION_CHARS),
            outcome,
            duration_ms: Self::elapsed_ms(item),
            note: note.into(),
        };
        self.records.push(record);
    }

    /// Mark the current item failed and keep the failure detail.
    pub fn record_failure(&mut self, attempts: u32) {
        let summary = self
            .last_verification
            .as_ref()
            .map(VerifyReport::summary)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "verification failed".to_string());
        let feedback = self.verification_feedback.clone();
        self.record_outcome(Outcome::Failed, format!("attempts: {attempts}; {summary}"));
        let Some(item) = self.current_item_mut() else {
            return;
        };
        item.status = ItemStatus::Failed;
        let failure = FailureRecord {
            item_id: item.id.clone(),
            description: item.description.clone(),
            attempts,
            duration_ms: Self::elapsed_ms(item),
            summary,
            feedback,
        };
        self.failures.push(failure);
        self.stats.failed += 1;
    }

    /// Milliseconds since the run started.
    pub fn run_elapsed_ms(&self) -> u64 {
        let started = self.stats.started.unwrap_or(self.created);
        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Local `HH:MM:SS`.
pub fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Local `YYYY-MM-DD HH:MM:SS`.
pub fn clock_datetime() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::item;

    fn ctx_with_current() -> RunContext {
        let mut ctx = RunContext::new("/tmp/project", RunConfig::default()).expect("ctx");
        ctx.catalog.items.push(item("IMPL-1", &[]));
        ctx.current = Some(0);
        ctx
    }

    #[test]
    fn first_halt_reason_wins() {
        let mut ctx = ctx_with_current();
        ctx.halt_with(HaltReason::ItemFailed {
            item: "IMPL-1".to_string(),
        });
        ctx.halt_with(HaltReason::StageHalted {
            stage: "report".to_string(),
        });
        assert_eq!(
            ctx.halt,
            Some(HaltReason::ItemFailed {
                item: "IMPL-1".to_string()
            })
        );
    }

    #[test]
    fn reset_clears_retry_state() {
        let mut ctx = ctx_with_current();
        ctx.catalog.items[0].attempts = 2;
        ctx.verification_feedback = "## TEST FAILED".to_string();
        ctx.reset_item_state();
        assert_eq!(ctx.catalog.items[0].attempts, 0);
        assert!(ctx.verification_feedback.is_empty());
    }

    #[test]
    fn failure_marks_item_and_keeps_feedback() {
        let mut ctx = ctx_with_current();
        ctx.verification_feedback = "## TEST FAILED\nboom".to_string();
        ctx.record_failure(3);
        assert_eq!(ctx.catalog.items[0].status, ItemStatus::Failed);
        assert_eq!(ctx.stats.failed, 1);
        assert_eq!(ctx.failures[0].attempts, 3);
        assert_eq!(ctx.failures[0].feedback, "## TEST FAILED\nboom");
        assert_eq!(ctx.records[0].outcome, Outcome::Failed);
        assert!(ctx.records[0].note.starts_with("attempts: 3"));
    }

    #[test]
    fn stop_reason_renders_phase_and_cause() {
        let stop = StopReason::Halted {
            phase: Phase::Iterate,
            reason: HaltReason::MissingReferences {
                item: "IMPL-1".to_string(),
                missing: vec!["IMPL-9".to_string()],
            },
        };
        assert_eq!(
            stop.to_string(),
            "halted in iterate: IMPL-1 references unknown ids: IMPL-9"
        );
    }
}
