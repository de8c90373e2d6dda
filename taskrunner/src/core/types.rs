//! Work item model shared by catalog parsing, selection and the pipeline,
//! plus the run records the pipeline accumulates for reporting.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a work item.
///
/// `Failed` only exists for the current run: the checklist has no failed
/// marker, so a failed item stays pending on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Done,
    Failed,
}

/// One schedulable unit of work parsed from the checklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Uppercase identity, unique across the document.
    pub id: String,
    /// Entry text after the checkbox marker.
    pub description: String,
    /// Lines following the entry, joined with `\n`.
    pub body: String,
    pub status: ItemStatus,
    /// Declared item-level dependencies, in first-seen order.
    pub dependencies: Vec<String>,
    /// Declared group-level dependencies, normalized to four digits.
    pub group_dependencies: Vec<String>,
    /// Act invocations for this item in the current run.
    pub attempts: u32,
    /// Zero-based line of the entry in the source document.
    pub line_index: usize,
    /// Set when the item is selected; used for outcome durations.
    pub selected_at: Option<Instant>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, description: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            body: String::new(),
            status,
            dependencies: Vec::new(),
            group_dependencies: Vec::new(),
            attempts: 0,
            line_index: 0,
            selected_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }

    /// Description cut to at most `max_chars` characters.
    pub fn short_description(&self, max_chars: usize) -> String {
        self.description.chars().take(max_chars).collect()
    }
}

/// Final label of an item in the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Done,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// One outcome row in the run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub item_id: String,
    /// First 40 characters of the description.
    pub description: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub note: String,
}

/// Stage failure captured at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub time: String,
    pub stage: String,
    pub message: String,
}

/// Detail kept for an item that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub item_id: String,
    pub description: String,
    pub attempts: u32,
    pub duration_ms: u64,
    /// Condensed one-line failure summary.
    pub summary: String,
    /// Full verification feedback from the last attempt.
    pub feedback: String,
}
