//! Per-task execution
//!
//! Running one task means: wait for its required keys, assemble the
//! prompt, call the backend with retry, round-trip any embedded tool
//! calls, then record and publish the output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::{BackendRegistry, GenerationBackend};
use crate::error::CovenantError;
use crate::event::Event;
use crate::history::OutputHistory;
use crate::store::SharedStore;
use crate::tools::{self, ToolRegistry};
use crate::types::TaskDefinition;

/// Invoked with `(task_id, role, output)` after each task completes.
/// Session persistence hangs off this; the engine itself never writes
/// anything durable.
pub type MessageCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Execution knobs. Defaults match production use; tests dial the
/// durations down to milliseconds.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wait budget per required key. Generous, because the publishing
    /// task may itself be blocked on a slow backend.
    pub required_key_timeout: Duration,
    /// Generation attempts before a task is declared failed
    pub max_attempts: u32,
    /// Attempt N sleeps N of these before the next try
    pub backoff_unit: Duration,
    /// Cadence of still-generating heartbeat events
    pub heartbeat_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            required_key_timeout: Duration::from_secs(300),
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Executes single tasks against the shared store and output history
pub struct TaskRunner {
    tasks: Vec<TaskDefinition>,
    backends: BackendRegistry,
    tools: Arc<ToolRegistry>,
    store: Arc<SharedStore>,
    history: Arc<OutputHistory>,
    config: RunnerConfig,
    /// Transcript of a previous run, prepended to every prompt
    session_history: Option<String>,
    message_callback: Option<MessageCallback>,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl TaskRunner {
    pub fn new(
        tasks: Vec<TaskDefinition>,
        backends: BackendRegistry,
        tools: Arc<ToolRegistry>,
        store: Arc<SharedStore>,
        history: Arc<OutputHistory>,
    ) -> Self {
        Self {
            tasks,
            backends,
            tools,
            store,
            history,
            config: RunnerConfig::default(),
            session_history: None,
            message_callback: None,
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_session_history(mut self, history: impl Into<String>) -> Self {
        self.session_history = Some(history.into());
        self
    }

    pub fn with_message_callback(mut self, callback: MessageCallback) -> Self {
        self.message_callback = Some(callback);
        self
    }

    pub fn with_event_sender(mut self, event_tx: mpsc::UnboundedSender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Look up a declared task by id.
    pub fn find_task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Run one task to completion and return its output text.
    pub async fn run(&self, task: &TaskDefinition) -> Result<String, CovenantError> {
        let Some(backend) = self.backends.get(&task.backend) else {
            return Err(self.task_failed(task, CovenantError::BackendNotFound(task.backend.clone())));
        };

        if !task.requires.is_empty() {
            info!(task_id = %task.id, requires = ?task.requires, "Waiting for required keys");
            for key in &task.requires {
                match self
                    .store
                    .await_key(key, self.config.required_key_timeout)
                    .await
                {
                    Ok(value) => {
                        // Make the resolved value visible to the prompt
                        // builder under a marked identifier.
                        self.history.append(&format!("shared:{key}"), &value.as_text());
                        debug!(task_id = %task.id, key = %key, "Received required key");
                    }
                    Err(_) => {
                        return Err(self.task_failed(
                            task,
                            CovenantError::RequiredKeyUnavailable {
                                task: task.id.clone(),
                                key: key.clone(),
                                waited: self.config.required_key_timeout,
                            },
                        ));
                    }
                }
            }
        }

        let prompt = self.build_prompt(task);
        info!(task_id = %task.id, role = %task.role, "Running task");
        self.emit(Event::TaskStarted {
            task_id: task.id.clone(),
        });

        let started = Instant::now();
        let mut output = match self.generate_with_retry(task, &backend, &prompt).await {
            Ok(text) => text,
            Err(err) => return Err(self.task_failed(task, err)),
        };

        let has_tools = !task.tools.is_empty() || !task.toolsets.is_empty();
        if has_tools && tools::has_tool_calls(&output) {
            let calls = tools::parse_tool_calls(&output);
            if !calls.is_empty() {
                let results = self.tools.execute_calls(&calls);
                for result in &results {
                    self.emit(Event::ToolCallFinished {
                        task_id: task.id.clone(),
                        tool: result.tool.clone(),
                        ok: result.outcome.is_ok(),
                    });
                }

                let results_block = tools::format_results(&results);
                if !results_block.is_empty() {
                    let followup = format!(
                        "{prompt}\n\nPrevious response:\n{output}{results_block}\n\nNow provide your final response incorporating the tool results:"
                    );
                    // A failed follow-up keeps the pre-tool response;
                    // tool trouble is never fatal to the task.
                    match backend.generate(&followup).await {
                        Ok(final_text) => {
                            debug!(task_id = %task.id, chars = final_text.len(), "Tool follow-up completed");
                            output = final_text;
                        }
                        Err(err) => {
                            warn!(task_id = %task.id, error = %err, "Tool follow-up failed, keeping original response");
                        }
                    }
                }
            }
        }

        self.history.append(&task.id, &output);

        for key in &task.outputs {
            self.store.publish(key, output.clone());
            info!(task_id = %task.id, key = %key, "Published output key");
            self.emit(Event::KeyPublished {
                task_id: task.id.clone(),
                key: key.clone(),
            });
        }

        if let Some(callback) = &self.message_callback {
            callback(&task.id, &task.role, &output);
        }

        let elapsed = started.elapsed();
        info!(
            task_id = %task.id,
            elapsed_secs = elapsed.as_secs_f64(),
            chars = output.len(),
            "Task completed"
        );
        self.emit(Event::TaskCompleted {
            task_id: task.id.clone(),
            chars: output.len(),
            elapsed,
        });

        Ok(output)
    }

    /// Prompt sections in order: prior-run transcript, the task's own
    /// text, context from earlier tasks, tool listing. Empty sections
    /// vanish entirely.
    fn build_prompt(&self, task: &TaskDefinition) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(session) = &self.session_history {
            if !session.trim().is_empty() {
                sections.push(session.trim_end().to_string());
            }
        }

        let text = task.prompt_text();
        if !text.is_empty() {
            sections.push(text.to_string());
        }

        let context = self.history.render_context();
        if !context.is_empty() {
            sections.push(format!(
                "Context from previous tasks:\n\n{}",
                context.trim_end()
            ));
        }

        let listing = self.tool_listing(task);
        if !listing.is_empty() {
            sections.push(listing.trim_end().to_string());
        }

        sections.join("\n\n")
    }

    fn tool_listing(&self, task: &TaskDefinition) -> String {
        let mut all = Vec::new();

        if !task.tools.is_empty() {
            if let Ok(mut named) = self.tools.by_names(&task.tools) {
                all.append(&mut named);
            }
        }
        for set in &task.toolsets {
            all.extend(self.tools.by_prefix(&format!("{set}.")));
        }

        tools::format_for_prompt(&all)
    }

    /// Bounded retry around the backend call, with a heartbeat notifier
    /// running alongside. The notifier is joined before returning, so no
    /// background activity survives the attempt loop.
    async fn generate_with_retry(
        &self,
        task: &TaskDefinition,
        backend: &Arc<dyn GenerationBackend>,
        prompt: &str,
    ) -> Result<String, CovenantError> {
        let started = Instant::now();
        let (stop_tx, heartbeat) = self.spawn_heartbeat(&task.id, started);

        let mut outcome: anyhow::Result<String> = Err(anyhow::anyhow!("no attempts made"));
        for attempt in 1..=self.config.max_attempts {
            match backend.generate(prompt).await {
                Ok(text) => {
                    outcome = Ok(text);
                    break;
                }
                Err(err) => {
                    warn!(task_id = %task.id, attempt, error = %err, "Generation attempt failed");
                    self.emit(Event::GenerationRetry {
                        task_id: task.id.clone(),
                        attempt,
                        error: err.to_string(),
                    });
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.backoff_unit * attempt).await;
                    }
                    outcome = Err(err);
                }
            }
        }

        let _ = stop_tx.send(());
        let _ = heartbeat.await;

        outcome.map_err(|cause| CovenantError::GenerationFailed {
            task: task.id.clone(),
            attempts: self.config.max_attempts,
            cause,
        })
    }

    fn spawn_heartbeat(
        &self,
        task_id: &str,
        started: Instant,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let interval = self.config.heartbeat_interval;
        let event_tx = self.event_tx.clone();
        let task_id = task_id.to_string();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => {
                        let elapsed = started.elapsed();
                        debug!(task_id = %task_id, elapsed_secs = elapsed.as_secs(), "Still generating");
                        if let Some(tx) = &event_tx {
                            let _ = tx.send(Event::Heartbeat {
                                task_id: task_id.clone(),
                                elapsed,
                            });
                        }
                    }
                }
            }
        });

        (stop_tx, handle)
    }

    fn task_failed(&self, task: &TaskDefinition, err: CovenantError) -> CovenantError {
        warn!(task_id = %task.id, error = %err, "Task failed");
        self.emit(Event::TaskFailed {
            task_id: task.id.clone(),
            error: err.to_string(),
        });
        err
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventChannel;
    use crate::testutil::{backend_registry, EchoTool, ScriptedBackend};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn fast_config() -> RunnerConfig {
        RunnerConfig {
            required_key_timeout: Duration::from_millis(100),
            max_attempts: 3,
            backoff_unit: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(10),
        }
    }

    fn runner_for(
        task: &TaskDefinition,
        backend: &Arc<ScriptedBackend>,
    ) -> TaskRunner {
        TaskRunner::new(
            vec![task.clone()],
            backend_registry(&[(task.backend.as_str(), Arc::clone(backend))]),
            Arc::new(ToolRegistry::new()),
            Arc::new(SharedStore::new(Uuid::new_v4())),
            Arc::new(OutputHistory::new()),
        )
        .with_config(fast_config())
    }

    fn task(id: &str) -> TaskDefinition {
        TaskDefinition {
            id: id.into(),
            backend: "test".into(),
            role: "Worker".into(),
            goal: format!("goal for {id}"),
            ..Default::default()
        }
    }

    // === Resolution and required keys ===

    #[tokio::test]
    async fn test_backend_not_found() {
        let backend = ScriptedBackend::always("unused");
        let mut def = task("orphan");
        def.backend = "ghost".into();

        let runner = TaskRunner::new(
            vec![def.clone()],
            backend_registry(&[("test", Arc::clone(&backend))]),
            Arc::new(ToolRegistry::new()),
            Arc::new(SharedStore::new(Uuid::new_v4())),
            Arc::new(OutputHistory::new()),
        );

        let err = runner.run(&def).await.unwrap_err();
        assert!(matches!(err, CovenantError::BackendNotFound(name) if name == "ghost"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_required_key_resolved_into_prompt() {
        let backend = ScriptedBackend::always("done");
        let mut def = task("consumer");
        def.requires = vec!["notes".into()];

        let runner = runner_for(&def, &backend);
        runner.store.publish("notes", "upstream findings");

        let output = runner.run(&def).await.unwrap();
        assert_eq!(output, "done");

        // The resolved value lands in history under a marked id and the
        // prompt carries it verbatim.
        let context = runner.history.render_context();
        assert!(context.contains("[shared:notes]:\nupstream findings"));
        let prompt = &backend.prompts()[0];
        assert!(prompt.contains("upstream findings"));
    }

    #[tokio::test]
    async fn test_required_key_timeout() {
        let backend = ScriptedBackend::always("unused");
        let mut def = task("starved");
        def.requires = vec!["never".into()];

        let runner = runner_for(&def, &backend);

        let started = Instant::now();
        let err = runner.run(&def).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(100));

        match err {
            CovenantError::RequiredKeyUnavailable { task, key, .. } => {
                assert_eq!(task, "starved");
                assert_eq!(key, "never");
            }
            other => panic!("expected RequiredKeyUnavailable, got {other}"),
        }
        assert_eq!(backend.calls(), 0);
    }

    // === Prompt assembly ===

    #[tokio::test]
    async fn test_prompt_is_goal_only_when_nothing_else() {
        let backend = ScriptedBackend::always("ok");
        let def = task("solo");

        let runner = runner_for(&def, &backend);
        runner.run(&def).await.unwrap();

        assert_eq!(backend.prompts()[0], "goal for solo");
    }

    #[tokio::test]
    async fn test_prompt_includes_session_history_first() {
        let backend = ScriptedBackend::always("ok");
        let def = task("second-run");

        let runner = runner_for(&def, &backend).with_session_history("earlier transcript");
        runner.run(&def).await.unwrap();

        let prompt = &backend.prompts()[0];
        assert!(prompt.starts_with("earlier transcript\n\ngoal for second-run"));
    }

    #[tokio::test]
    async fn test_prompt_lists_tools() {
        let backend = ScriptedBackend::always("plain answer");
        let mut def = task("tooled");
        def.tools = vec!["echo".into()];

        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let runner = TaskRunner::new(
            vec![def.clone()],
            backend_registry(&[("test", Arc::clone(&backend))]),
            Arc::new(tools),
            Arc::new(SharedStore::new(Uuid::new_v4())),
            Arc::new(OutputHistory::new()),
        )
        .with_config(fast_config());

        runner.run(&def).await.unwrap();
        let prompt = &backend.prompts()[0];
        assert!(prompt.contains("**echo**"));
        assert!(prompt.contains("```tool:<tool_name>"));
    }

    // === Retry ===

    #[tokio::test]
    async fn test_retry_then_success() {
        let backend =
            ScriptedBackend::sequence(vec![Err("boom 1"), Err("boom 2"), Ok("third time lucky")]);
        let def = task("flaky");

        let (event_tx, events) = EventChannel::new();
        let runner = runner_for(&def, &backend).with_event_sender(event_tx);

        let started = Instant::now();
        let output = runner.run(&def).await.unwrap();
        assert_eq!(output, "third time lucky");
        assert_eq!(backend.calls(), 3);
        // Backoff of 1 and 2 units.
        assert!(started.elapsed() >= Duration::from_millis(30));

        let retries = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, Event::GenerationRetry { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let backend = ScriptedBackend::failing("QUOTA_EXCEEDED[test-model]: quota limit reached");
        let def = task("doomed");

        let runner = runner_for(&def, &backend);
        let err = runner.run(&def).await.unwrap_err();

        assert_eq!(backend.calls(), 3);
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.is_quota_exceeded());
        assert!(runner.history.is_empty());
    }

    // === Heartbeat ===

    struct SlowBackend {
        delay: Duration,
    }

    #[async_trait]
    impl crate::backend::GenerationBackend for SlowBackend {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok("slow answer".into())
        }
    }

    #[tokio::test]
    async fn test_heartbeat_fires_and_stops() {
        let def = task("slow");
        let mut registry = BackendRegistry::new();
        registry.register(
            "test",
            Arc::new(SlowBackend {
                delay: Duration::from_millis(60),
            }),
        );

        let (event_tx, events) = EventChannel::new();
        let runner = TaskRunner::new(
            vec![def.clone()],
            registry,
            Arc::new(ToolRegistry::new()),
            Arc::new(SharedStore::new(Uuid::new_v4())),
            Arc::new(OutputHistory::new()),
        )
        .with_config(fast_config())
        .with_event_sender(event_tx);

        runner.run(&def).await.unwrap();

        let beats = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, Event::Heartbeat { .. }))
            .count();
        assert!(beats >= 2, "expected several heartbeats, got {beats}");

        // The notifier is joined on completion; nothing fires afterwards.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.drain().is_empty());
    }

    // === Tool round-trip ===

    fn tooled_runner(
        def: &TaskDefinition,
        backend: &Arc<ScriptedBackend>,
    ) -> (TaskRunner, EventChannel) {
        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let (event_tx, events) = EventChannel::new();
        let runner = TaskRunner::new(
            vec![def.clone()],
            backend_registry(&[("test", Arc::clone(backend))]),
            Arc::new(tools),
            Arc::new(SharedStore::new(Uuid::new_v4())),
            Arc::new(OutputHistory::new()),
        )
        .with_config(fast_config())
        .with_event_sender(event_tx);
        (runner, events)
    }

    #[tokio::test]
    async fn test_tool_roundtrip_mixed_results() {
        let raw = "Checking.\n```tool:echo\nping\n```\n```tool:ghost\nboo\n```";
        let backend = ScriptedBackend::sequence(vec![Ok(raw), Ok("final answer")]);
        let mut def = task("tooled");
        def.tools = vec!["echo".into()];

        let (runner, events) = tooled_runner(&def, &backend);
        let output = runner.run(&def).await.unwrap();
        assert_eq!(output, "final answer");
        assert_eq!(backend.calls(), 2);

        // Follow-up prompt carries the previous response and both results.
        let followup = &backend.prompts()[1];
        assert!(followup.contains("Previous response:"));
        assert!(followup.contains("=== Tool Results ==="));
        assert!(followup.contains("[echo]:\nping"));
        assert!(followup.contains("[ghost]:\nERROR: unknown tool: ghost"));

        let outcomes: Vec<bool> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::ToolCallFinished { ok, .. } => Some(ok),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec![true, false]);
    }

    #[tokio::test]
    async fn test_tool_followup_failure_keeps_original() {
        let raw = "```tool:echo\nping\n```";
        // Second call (the follow-up) hits the exhausted-script error.
        let backend = ScriptedBackend::sequence(vec![Ok(raw)]);
        let mut def = task("tooled");
        def.tools = vec!["echo".into()];

        let (runner, _events) = tooled_runner(&def, &backend);
        let output = runner.run(&def).await.unwrap();
        assert_eq!(output, raw);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_tool_blocks_ignored_without_declared_tools() {
        let raw = "```tool:echo\nping\n```";
        let backend = ScriptedBackend::sequence(vec![Ok(raw)]);
        let def = task("toolless");

        let runner = runner_for(&def, &backend);
        let output = runner.run(&def).await.unwrap();
        assert_eq!(output, raw);
        assert_eq!(backend.calls(), 1);
    }

    // === Completion side effects ===

    #[tokio::test]
    async fn test_outputs_published_and_callback_fired() {
        let backend = ScriptedBackend::always("the result");
        let mut def = task("producer");
        def.outputs = vec!["result".into(), "copy".into()];

        let seen: Arc<Mutex<Vec<(String, String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let runner = runner_for(&def, &backend).with_message_callback(Arc::new(
            move |id: &str, role: &str, content: &str| {
                sink.lock().push((id.into(), role.into(), content.into()));
            },
        ));

        let output = runner.run(&def).await.unwrap();

        assert_eq!(runner.store.get_text("result"), "the result");
        assert_eq!(runner.store.get_text("copy"), "the result");
        assert_eq!(runner.history.last_output(), output);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            (
                "producer".to_string(),
                "Worker".to_string(),
                "the result".to_string()
            )
        );
    }
}
