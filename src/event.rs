//! Progress events emitted during a run
//!
//! The engine reports what it is doing over an unbounded channel and never
//! blocks on it; dropping the consumer is legal and changes nothing about
//! execution.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Something the engine did or observed
#[derive(Debug, Clone)]
pub enum Event {
    WorkflowStarted {
        run_id: Uuid,
        mode: String,
    },
    WorkflowCompleted {
        run_id: Uuid,
    },
    WorkflowFailed {
        run_id: Uuid,
        error: String,
    },
    TaskStarted {
        task_id: String,
    },
    TaskCompleted {
        task_id: String,
        chars: usize,
        elapsed: Duration,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    /// One generation attempt failed; another follows after backoff
    GenerationRetry {
        task_id: String,
        attempt: u32,
        error: String,
    },
    /// Generation is still in flight
    Heartbeat {
        task_id: String,
        elapsed: Duration,
    },
    ToolCallFinished {
        task_id: String,
        tool: String,
        ok: bool,
    },
    KeyPublished {
        task_id: String,
        key: String,
    },
}

/// Consumer-side handle for receiving engine events
#[derive(Clone)]
pub struct EventChannel {
    event_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl EventChannel {
    /// Create a channel pair: the sender goes to the engine, the handle to
    /// whoever wants progress.
    pub fn new() -> (mpsc::UnboundedSender<Event>, Self) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let channel = Self {
            event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        };
        (event_tx, channel)
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Option<Event> {
        self.event_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Receive the next event, waiting for one to arrive. Returns `None`
    /// once the engine side is gone and the queue is drained.
    pub async fn recv(&self) -> Option<Event> {
        self.event_rx.lock().await.recv().await
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
