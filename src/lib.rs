//! # Covenant
//!
//! Declarative agent workflow engine - the binding pact.
//!
//! This crate executes a graph of dependent agent tasks: each task feeds a
//! prompt to a text-generation backend, may wait on data published by
//! other tasks, and publishes its own output for the tasks that follow.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        WORKFLOW EXECUTOR                             │
//! │        sequential chain │ parallel fan-out │ single fallback         │
//! └────────────────────────────┬────────────────────────────────────────┘
//!                              │ drives
//!                              ▼
//!                      ┌──────────────┐
//!                      │  TASK RUNNER │  await keys → prompt → generate
//!                      └──────┬───────┘  (retry) → tool round-trip
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!       ┌────────────┐ ┌────────────┐ ┌────────────┐
//!       │ SHARED     │ │ OUTPUT     │ │ BACKENDS / │
//!       │ STORE      │ │ HISTORY    │ │ TOOLS      │
//!       │ (pub/sub)  │ │ (ordered)  │ │ (injected) │
//!       └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Task**: one unit of declarative work (id, backend, prompt material,
//!   dependencies)
//! - **Backend**: a pluggable text-generation capability, selected per task
//! - **Shared store**: blocking publish/subscribe map used for data
//!   hand-off between tasks
//! - **Workflow**: the run shape - an ordered chain, a parallel group with
//!   an optional aggregator, or a single root task

pub mod backend;
pub mod builtin;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod history;
pub mod runner;
pub mod state;
pub mod store;
pub mod tools;
pub mod types;

#[cfg(test)]
mod testutil;

pub use backend::{BackendRegistry, GenerationBackend};
pub use error::CovenantError;
pub use event::{Event, EventChannel};
pub use executor::WorkflowExecutor;
pub use history::{HistoryEntry, OutputHistory};
pub use runner::{MessageCallback, RunnerConfig, TaskRunner};
pub use state::{ExecutionState, ExecutionStatus};
pub use store::{SharedStore, StoreValue};
pub use tools::{Tool, ToolRegistry};
pub use types::{TaskDefinition, WorkflowConfig, WorkflowSpec, WorkflowStep};
