//! agentrun Control Plane Library
//!
//! This crate coordinates long-running agent runs per project: it decides
//! whether a submitted task starts fresh, resumes a completed run or is
//! rejected, persists run snapshots and streams live progress to observers.

pub mod agent;
pub mod bus;
pub mod config;
pub mod http;
pub mod locks;
pub mod metrics;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod tokens;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{ProgressBus, ProgressSubscription};
pub use config::Config;
pub use orchestrator::{ExecutionOrchestrator, SubmitError, SubmitReceipt};
pub use state::AppState;
pub use store::{InMemoryStateStore, SqliteStateStore, StateStore, StoreError};
pub use worker::{RunOutcome, TaskWorker};
