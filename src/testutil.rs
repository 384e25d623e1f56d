//! Test doubles shared across the engine tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendRegistry, GenerationBackend};
use crate::tools::Tool;

/// A backend that replays a script of responses and records every prompt
/// it was asked to generate from.
pub(crate) struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, String>>>,
    /// Returned once the script is exhausted
    fallback: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Replies with `reply` on every call.
    pub fn always(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Fails with `message` on every call.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Plays `script` in order, then fails.
    pub fn sequence(script: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            fallback: Err("script exhausted".to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().push(prompt.to_string());
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(|message| anyhow::anyhow!(message))
    }
}

/// Build a registry from named backends.
pub(crate) fn backend_registry(
    backends: &[(&str, Arc<ScriptedBackend>)],
) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for (name, backend) in backends {
        registry.register(name, Arc::clone(backend) as Arc<dyn GenerationBackend>);
    }
    registry
}

/// A tool that echoes its input back.
pub(crate) struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn execute(&self, input: &str) -> anyhow::Result<String> {
        Ok(input.to_string())
    }
}
