//! Execution status and progress tracking

use parking_lot::RwLock;
use serde::Serialize;

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl ExecutionStatus {
    /// Completed and Failed accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Owned snapshot of the execution state, safe to hand to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub current_step: usize,
    pub total_steps: usize,
    /// Display text of the error that moved the run to Failed
    pub error: Option<String>,
}

/// Interior-mutable state cell. Mutated only by the executor; everyone
/// else reads snapshots.
pub struct StateCell {
    inner: RwLock<ExecutionState>,
}

impl StateCell {
    pub fn new(total_steps: usize) -> Self {
        Self {
            inner: RwLock::new(ExecutionState {
                status: ExecutionStatus::Pending,
                current_step: 0,
                total_steps,
                error: None,
            }),
        }
    }

    /// Pending → Running. No-op when already running or terminal.
    pub fn start(&self) {
        let mut state = self.inner.write();
        if state.status == ExecutionStatus::Pending {
            state.status = ExecutionStatus::Running;
        }
    }

    /// Bump the progress counter. Informational only; never gates
    /// execution.
    pub fn advance_step(&self) {
        self.inner.write().current_step += 1;
    }

    /// Move to Completed. Ignored once terminal.
    pub fn complete(&self) {
        let mut state = self.inner.write();
        if !state.status.is_terminal() {
            state.status = ExecutionStatus::Completed;
        }
    }

    /// Move to Failed, recording the error text. Ignored once terminal.
    pub fn fail(&self, error: &crate::error::CovenantError) {
        let mut state = self.inner.write();
        if !state.status.is_terminal() {
            state.status = ExecutionStatus::Failed;
            state.error = Some(error.to_string());
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.read().status == ExecutionStatus::Running
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> ExecutionState {
        self.inner.read().clone()
    }
}
