//! Generation backend seam
//!
//! One implementation per provider lives outside this crate; the engine
//! treats them all as "text in, text out" and is indifferent to which one
//! a task is configured with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// A pluggable text-generation capability, selected per task.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response for the prompt. Implementations report failures
    /// through the error; transport retries are the engine's job, not
    /// theirs.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Injected name → client map. No process-wide registry: whoever builds
/// the executor decides which backends exist.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under a backend name. Re-registering a name
    /// replaces the previous client.
    pub fn register(&mut self, name: &str, backend: Arc<dyn GenerationBackend>) {
        self.backends.insert(name.to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
