//! Workflow executor - drives task runs according to the workflow shape
//!
//! Three shapes exist: an ordered sequential chain, a flat parallel
//! fan-out with an optional aggregator, and a single-task fallback when no
//! workflow block is declared. Anything else is an error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::backend::BackendRegistry;
use crate::error::CovenantError;
use crate::event::{Event, EventChannel};
use crate::history::OutputHistory;
use crate::runner::{MessageCallback, RunnerConfig, TaskRunner};
use crate::state::{ExecutionState, StateCell};
use crate::store::SharedStore;
use crate::tools::ToolRegistry;
use crate::types::{WorkflowConfig, WorkflowSpec};

/// Shared result sink for parallel branches. Whichever branch locks it
/// first with an error decides the run's error.
#[derive(Default)]
struct BranchOutcome {
    first_error: Option<CovenantError>,
    results: HashMap<String, String>,
}

/// Executes one workflow run
///
/// Owns the run-scoped store, history and state; collaborators (backends,
/// tools, callbacks) are injected at construction.
pub struct WorkflowExecutor {
    config: WorkflowConfig,
    backends: BackendRegistry,
    tools: Arc<ToolRegistry>,
    store: Arc<SharedStore>,
    history: Arc<OutputHistory>,
    state: Arc<StateCell>,
    runner_config: RunnerConfig,
    session_history: Option<String>,
    message_callback: Option<MessageCallback>,
    event_tx: mpsc::UnboundedSender<Event>,
    run_id: Uuid,
}

impl WorkflowExecutor {
    /// Create an executor with no event consumer.
    pub fn new(config: WorkflowConfig, backends: BackendRegistry, tools: ToolRegistry) -> Self {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        Self::build(config, backends, tools, event_tx)
    }

    /// Create an executor and return a channel for observing progress.
    pub fn with_channel(
        config: WorkflowConfig,
        backends: BackendRegistry,
        tools: ToolRegistry,
    ) -> (Self, EventChannel) {
        let (event_tx, channel) = EventChannel::new();
        (Self::build(config, backends, tools, event_tx), channel)
    }

    fn build(
        config: WorkflowConfig,
        backends: BackendRegistry,
        tools: ToolRegistry,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let run_id = Uuid::new_v4();
        let total_steps = config.total_steps();

        info!(run_id = %run_id, tasks = config.tasks.len(), "Creating workflow executor");

        Self {
            config,
            backends,
            tools: Arc::new(tools),
            store: Arc::new(SharedStore::new(run_id)),
            history: Arc::new(OutputHistory::new()),
            state: Arc::new(StateCell::new(total_steps)),
            runner_config: RunnerConfig::default(),
            session_history: None,
            message_callback: None,
            event_tx,
            run_id,
        }
    }

    /// Override the runner's timing knobs.
    pub fn set_runner_config(&mut self, config: RunnerConfig) {
        self.runner_config = config;
    }

    /// Prepend a previous run's transcript to every prompt.
    pub fn set_session_history(&mut self, history: impl Into<String>) {
        self.session_history = Some(history.into());
    }

    /// Invoke a callback with `(task_id, role, output)` on each completed
    /// task, typically to persist a session transcript.
    pub fn set_message_callback(&mut self, callback: MessageCallback) {
        self.message_callback = Some(callback);
    }

    /// Run the workflow to completion and return the final output.
    ///
    /// On error the store and history keep whatever partial progress was
    /// made, so callers can persist it before surfacing the failure.
    pub async fn execute(&self) -> Result<String, CovenantError> {
        match &self.config.workflow {
            None => self.execute_fallback().await,
            Some(spec) => match spec.kind.as_str() {
                "sequential" => self.execute_sequential(spec).await,
                "parallel" => self.execute_parallel(spec).await,
                other => Err(CovenantError::UnknownWorkflowType(other.to_string())),
            },
        }
    }

    async fn execute_sequential(&self, spec: &WorkflowSpec) -> Result<String, CovenantError> {
        self.state.start();
        self.emit(Event::WorkflowStarted {
            run_id: self.run_id,
            mode: "sequential".into(),
        });
        info!(run_id = %self.run_id, steps = spec.steps.len(), "Executing sequential workflow");

        let runner = self.build_runner();

        for step in &spec.steps {
            let Some(task) = self.config.task(&step.task) else {
                return Err(self.run_failed(CovenantError::TaskNotFound(step.task.clone())));
            };

            if let Err(err) = runner.run(task).await {
                return Err(self.run_failed(err));
            }
            self.state.advance_step();
        }

        self.run_completed();
        Ok(self.history.last_output())
    }

    async fn execute_parallel(&self, spec: &WorkflowSpec) -> Result<String, CovenantError> {
        self.state.start();
        self.emit(Event::WorkflowStarted {
            run_id: self.run_id,
            mode: "parallel".into(),
        });
        info!(run_id = %self.run_id, branches = spec.branches.len(), "Executing parallel workflow");

        let runner = Arc::new(self.build_runner());
        let outcome = Arc::new(Mutex::new(BranchOutcome::default()));
        let mut branches = JoinSet::new();

        for branch_id in spec.branches.clone() {
            let runner = Arc::clone(&runner);
            let outcome = Arc::clone(&outcome);

            branches.spawn(async move {
                let Some(task) = runner.find_task(&branch_id).cloned() else {
                    let mut guard = outcome.lock();
                    if guard.first_error.is_none() {
                        guard.first_error = Some(CovenantError::TaskNotFound(branch_id));
                    }
                    return;
                };

                let result = runner.run(&task).await;
                let mut guard = outcome.lock();
                match result {
                    Ok(output) => {
                        guard.results.insert(task.id.clone(), output);
                    }
                    Err(err) => {
                        if guard.first_error.is_none() {
                            guard.first_error = Some(err);
                        }
                    }
                }
            });
        }

        // Failed siblings do not cancel the rest; every branch runs to
        // completion and losers' outputs are simply dropped.
        while branches.join_next().await.is_some() {}

        {
            let mut guard = outcome.lock();
            debug!(
                run_id = %self.run_id,
                succeeded = guard.results.len(),
                "Parallel branches joined"
            );
            if let Some(err) = guard.first_error.take() {
                drop(guard);
                return Err(self.run_failed(err));
            }
        }

        if let Some(then) = &spec.then {
            let Some(task) = self.config.task(&then.task) else {
                return Err(self.run_failed(CovenantError::TaskNotFound(then.task.clone())));
            };
            info!(run_id = %self.run_id, task_id = %task.id, "Running aggregator");
            if let Err(err) = runner.run(task).await {
                return Err(self.run_failed(err));
            }
        }

        self.run_completed();
        Ok(self.history.last_output())
    }

    async fn execute_fallback(&self) -> Result<String, CovenantError> {
        self.state.start();
        self.emit(Event::WorkflowStarted {
            run_id: self.run_id,
            mode: "single".into(),
        });

        // Prefer a declared supervisor, else the first task.
        let root = self
            .config
            .tasks
            .iter()
            .find(|t| t.is_supervisor())
            .or_else(|| self.config.tasks.first());

        let Some(task) = root else {
            return Err(self.run_failed(CovenantError::NoRootTask));
        };
        info!(run_id = %self.run_id, task_id = %task.id, "Executing single root task");

        let runner = self.build_runner();
        match runner.run(task).await {
            Ok(output) => {
                self.run_completed();
                Ok(output)
            }
            Err(err) => Err(self.run_failed(err)),
        }
    }

    /// Snapshot of the current execution state.
    pub fn state(&self) -> ExecutionState {
        self.state.snapshot()
    }

    /// The run-scoped key-value store, including partial results after a
    /// failed run.
    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    /// The run-scoped output history.
    pub fn history(&self) -> &Arc<OutputHistory> {
        &self.history
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn build_runner(&self) -> TaskRunner {
        let mut runner = TaskRunner::new(
            self.config.tasks.clone(),
            self.backends.clone(),
            Arc::clone(&self.tools),
            Arc::clone(&self.store),
            Arc::clone(&self.history),
        )
        .with_config(self.runner_config.clone())
        .with_event_sender(self.event_tx.clone());

        if let Some(session) = &self.session_history {
            runner = runner.with_session_history(session.clone());
        }
        if let Some(callback) = &self.message_callback {
            runner = runner.with_message_callback(Arc::clone(callback));
        }
        runner
    }

    fn run_completed(&self) {
        self.state.complete();
        info!(run_id = %self.run_id, "Workflow completed");
        self.emit(Event::WorkflowCompleted { run_id: self.run_id });
    }

    fn run_failed(&self, err: CovenantError) -> CovenantError {
        self.state.fail(&err);
        error!(run_id = %self.run_id, error = %err, "Workflow failed");
        self.emit(Event::WorkflowFailed {
            run_id: self.run_id,
            error: err.to_string(),
        });
        err
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}
