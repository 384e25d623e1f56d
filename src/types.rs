//! Workflow data model
//!
//! Everything here is deserialized once from the workflow file and treated
//! as read-only by the engine.

use serde::{Deserialize, Serialize};

/// A single unit of declarative work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique identifier within the workflow
    pub id: String,
    /// Name of the generation backend this task runs on
    #[serde(default)]
    pub backend: String,
    /// Short role label, e.g. "researcher"
    #[serde(default)]
    pub role: String,
    /// What the task should accomplish
    #[serde(default)]
    pub goal: String,
    /// Explicit instruction text; overrides the goal when present
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub description: String,
    /// Names of individual tools this task may invoke
    #[serde(default)]
    pub tools: Vec<String>,
    /// Names of tool groups; resolves every tool under `<group>.`
    #[serde(default)]
    pub toolsets: Vec<String>,
    /// Keys published to the shared store on completion
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Keys that must be published by other tasks before this one runs
    #[serde(default)]
    pub requires: Vec<String>,
    /// Declared sub-tasks; a non-empty list marks this task as supervisor
    #[serde(default)]
    pub sub_tasks: Vec<String>,
}

impl TaskDefinition {
    /// The text the prompt is built from. Instruction wins over goal.
    pub fn prompt_text(&self) -> &str {
        if !self.instruction.is_empty() {
            &self.instruction
        } else {
            &self.goal
        }
    }

    /// Supervisor tasks are preferred as the root in fallback mode.
    pub fn is_supervisor(&self) -> bool {
        !self.sub_tasks.is_empty()
    }
}

/// One step of a sequential workflow (or the aggregator of a parallel one)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Task to run
    pub task: String,
}

/// The shape of a workflow run
///
/// `kind` stays a plain string rather than an enum: an unrecognized value
/// must surface as a runtime `UnknownWorkflowType` error, not a parse
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(rename = "type")]
    pub kind: String,
    /// Ordered steps of a sequential workflow
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Task ids run concurrently in a parallel workflow
    #[serde(default)]
    pub branches: Vec<String>,
    /// Aggregator step run after all branches succeed
    #[serde(default)]
    pub then: Option<WorkflowStep>,
}

/// A fully loaded workflow description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    /// Absent workflow means single-task fallback mode
    #[serde(default)]
    pub workflow: Option<WorkflowSpec>,
}

impl WorkflowConfig {
    /// Total progress steps: steps + branches + the optional aggregator.
    pub fn total_steps(&self) -> usize {
        match &self.workflow {
            Some(spec) => {
                let mut total = spec.steps.len() + spec.branches.len();
                if spec.then.is_some() {
                    total += 1;
                }
                total
            }
            None => 0,
        }
    }

    /// Look up a declared task by id.
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
