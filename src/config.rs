//! Workflow file loading and validation

use std::path::Path;

use tracing::debug;

use crate::error::CovenantError;
use crate::types::WorkflowConfig;

impl WorkflowConfig {
    /// Parse a workflow description from YAML text and validate it.
    pub fn from_yaml_str(text: &str) -> Result<Self, CovenantError> {
        let config: WorkflowConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a workflow description from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CovenantError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading workflow file");
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check the structural invariants the engine relies on: unique task
    /// ids, and every step/branch/aggregator referencing a declared task.
    ///
    /// The executor re-checks references at run time and fails with
    /// `TaskNotFound` rather than trusting this was called.
    pub fn validate(&self) -> Result<(), CovenantError> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if task.id.is_empty() {
                return Err(CovenantError::Config("task with empty id".into()));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(CovenantError::Config(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }

        let Some(spec) = &self.workflow else {
            return Ok(());
        };

        for step in &spec.steps {
            if self.task(&step.task).is_none() {
                return Err(CovenantError::Config(format!(
                    "step references undeclared task: {}",
                    step.task
                )));
            }
        }
        for branch in &spec.branches {
            if self.task(branch).is_none() {
                return Err(CovenantError::Config(format!(
                    "branch references undeclared task: {branch}"
                )));
            }
        }
        if let Some(then) = &spec.then {
            if self.task(&then.task).is_none() {
                return Err(CovenantError::Config(format!(
                    "aggregator references undeclared task: {}",
                    then.task
                )));
            }
        }
        if spec.kind == "parallel" && spec.branches.is_empty() {
            return Err(CovenantError::Config(
                "parallel workflow declares no branches".into(),
            ));
        }

        Ok(())
    }
}
