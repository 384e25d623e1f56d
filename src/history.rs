//! Append-only record of completed task outputs
//!
//! Later prompts are built from this record, which is what gives a
//! sequential workflow its causal ordering: step N reads everything steps
//! 1..N-1 appended.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// One completed output
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub task_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Insertion-ordered output history for one workflow run.
///
/// Parallel branches append concurrently, so the vector sits behind a lock;
/// ordering between unrelated branches is whatever the lock hands out.
#[derive(Default)]
pub struct OutputHistory {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl OutputHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task's output with the current time.
    pub fn append(&self, task_id: &str, text: &str) {
        self.entries.write().push(HistoryEntry {
            task_id: task_id.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Render all entries as `[task_id]:\n<text>\n\n` in insertion order.
    /// Empty string when nothing has completed yet.
    pub fn render_context(&self) -> String {
        let entries = self.entries.read();
        let mut out = String::new();
        for entry in entries.iter() {
            out.push_str(&format!("[{}]:\n{}\n\n", entry.task_id, entry.text));
        }
        out
    }

    /// Text of the most recent entry; empty string when there is none.
    /// This is the workflow's final output in sequential/aggregator modes.
    pub fn last_output(&self) -> String {
        self.entries
            .read()
            .last()
            .map(|e| e.text.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all entries for diagnostics.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop all entries. For reuse between independent runs.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
