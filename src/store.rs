//! Shared key-value store for inter-task communication
//!
//! Tasks publish data under keys and other tasks block waiting for those
//! keys, which is how a parallel branch hands its output to the aggregator
//! (or to a sibling) outside the simple sequential ordering.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::error::CovenantError;

/// A value held in the store.
///
/// Consumers treat values as text; the JSON variant exists so structured
/// payloads survive for diagnostics instead of being flattened on write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StoreValue {
    Text(String),
    Json(serde_json::Value),
}

impl StoreValue {
    /// Best-effort text rendering. JSON strings render without quotes,
    /// everything else compactly.
    pub fn as_text(&self) -> String {
        match self {
            StoreValue::Text(s) => s.clone(),
            StoreValue::Json(serde_json::Value::String(s)) => s.clone(),
            StoreValue::Json(v) => v.to_string(),
        }
    }
}

impl From<String> for StoreValue {
    fn from(s: String) -> Self {
        StoreValue::Text(s)
    }
}

impl From<&str> for StoreValue {
    fn from(s: &str) -> Self {
        StoreValue::Text(s.to_string())
    }
}

impl From<serde_json::Value> for StoreValue {
    fn from(v: serde_json::Value) -> Self {
        StoreValue::Json(v)
    }
}

/// Thread-safe publish/subscribe map, one per workflow run.
///
/// `publish` wakes every waiter regardless of key; each waiter re-checks
/// its own key and deadline, so a stray wake is never mistaken for success
/// or timeout.
pub struct SharedStore {
    data: Mutex<HashMap<String, StoreValue>>,
    /// Broadcast wakeup, signalled on every publish
    published: Notify,
    run_id: Uuid,
}

impl SharedStore {
    /// Create an empty store for a run.
    pub fn new(run_id: Uuid) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            published: Notify::new(),
            run_id,
        }
    }

    /// Store a value and wake all waiters. A second publish under the same
    /// key overwrites the first.
    pub fn publish(&self, key: &str, value: impl Into<StoreValue>) {
        self.data.lock().insert(key.to_string(), value.into());
        debug!(run_id = %self.run_id, key, "Published key");
        self.published.notify_waiters();
    }

    /// Non-blocking read.
    pub fn get(&self, key: &str) -> Option<StoreValue> {
        self.data.lock().get(key).cloned()
    }

    /// Non-blocking read as text; empty string when the key is absent.
    pub fn get_text(&self, key: &str) -> String {
        self.get(key).map(|v| v.as_text()).unwrap_or_default()
    }

    /// Block until `key` is published or `timeout` elapses.
    ///
    /// Returns immediately when the key is already present. The wakeup is
    /// registered before each map check, so a publish between check and
    /// sleep cannot be lost; the remaining deadline is recomputed on every
    /// wake and no timer outlives the call.
    pub async fn await_key(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<StoreValue, CovenantError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.get(key) {
                return Ok(value);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CovenantError::KeyTimeout {
                    key: key.to_string(),
                    waited: timeout,
                });
            }

            // Either a publish fired (re-check the key) or the budget ran
            // out (re-check the deadline).
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    /// All keys currently present.
    pub fn keys(&self) -> Vec<String> {
        self.data.lock().keys().cloned().collect()
    }

    /// Copy of all entries; does not alias internal storage.
    pub fn snapshot(&self) -> HashMap<String, StoreValue> {
        self.data.lock().clone()
    }

    /// Remove all entries. Only meant for reuse between independent runs,
    /// never while waiters are active.
    pub fn clear(&self) {
        self.data.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}
