//! Task worker: drives one agent invocation for one run.
//!
//! The worker reports only through the state store and the progress bus.
//! Whatever happens to the agent (success, error, panic, deadline) the run
//! ends in a terminal state row; the join handle additionally resolves to a
//! [`RunOutcome`] for whoever cares to await it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use agentrun_core::{
    ProgressEvent, ProjectName, ProjectState, RunError, RunErrorKind, RunId, RunMode,
};

use crate::agent::{Agent, AgentError, AgentRun, StepUpdate};
use crate::bus::ProgressBus;
use crate::locks::ProjectLocks;
use crate::store::{StateStore, StoreError};

/// Shared services a worker writes through.
#[derive(Clone)]
pub struct RunServices {
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<ProgressBus>,
    pub locks: Arc<ProjectLocks>,
}

/// What a run is asked to do.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_name: ProjectName,
    pub run_id: RunId,
    pub mode: RunMode,
    pub message: String,
    /// State of the previous run, handed to the agent when resuming.
    pub prior_state: Option<ProjectState>,
}

/// How a run ended, as seen by its worker.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Finalized without error.
    Succeeded,
    /// Finalized with an error, or the terminal state could not be stored.
    Failed(RunError),
    /// The state row was taken over by another run; nothing was finalized.
    Superseded,
}

/// Wraps exactly one invocation of the agent.
pub struct TaskWorker {
    services: RunServices,
    agent: Arc<dyn Agent>,
    run_timeout: Option<Duration>,
    request: RunRequest,
}

impl TaskWorker {
    /// Create a worker for `request`.
    pub fn new(
        services: RunServices,
        agent: Arc<dyn Agent>,
        run_timeout: Option<Duration>,
        request: RunRequest,
    ) -> Self {
        Self {
            services,
            agent,
            run_timeout,
            request,
        }
    }

    /// Run on a new task; returns immediately.
    pub fn spawn(self) -> JoinHandle<RunOutcome> {
        tokio::spawn(self.run())
    }

    /// Drive the agent to a terminal state.
    pub async fn run(self) -> RunOutcome {
        let RunRequest {
            project_name,
            run_id,
            mode,
            message,
            prior_state,
        } = self.request.clone();

        info!(project = %project_name, run_id = %run_id, mode = ?mode, "Run started");
        let started = match mode {
            RunMode::Fresh => format!("Run {run_id} started"),
            RunMode::Resume => format!("Run {run_id} started, resuming previous work"),
        };
        self.services
            .bus
            .publish(ProgressEvent::info(project_name.clone(), run_id, started));

        let reporter = StepReporter::new(self.services.clone(), project_name.clone(), run_id);
        let agent_run = AgentRun {
            project_name: project_name.clone(),
            run_id,
            message,
            prior_state,
            reporter: reporter.clone(),
        };

        let agent = self.agent.clone();
        let invocation = AssertUnwindSafe(async move {
            match mode {
                RunMode::Fresh => agent.execute(agent_run).await,
                RunMode::Resume => agent.subsequent_execute(agent_run).await,
            }
        })
        .catch_unwind();

        let result = match self.run_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(project = %project_name, run_id = %run_id, ?deadline, "Run deadline elapsed");
                    return self
                        .finalize(Some(RunError::new(
                            RunErrorKind::Timeout,
                            format!("run exceeded its deadline of {}s", deadline.as_secs()),
                        )))
                        .await;
                }
            },
            None => invocation.await,
        };

        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(AgentError::Superseded { .. })) => {
                warn!(project = %project_name, run_id = %run_id, "Run superseded, not finalizing");
                return RunOutcome::Superseded;
            }
            Ok(Err(e)) => {
                warn!(project = %project_name, run_id = %run_id, error = %e, "Agent failed");
                Some(RunError::new(e.run_error_kind(), e.to_string()))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(project = %project_name, run_id = %run_id, panic = %message, "Agent panicked");
                Some(RunError::new(RunErrorKind::Panicked, message))
            }
        };

        debug!(project = %project_name, run_id = %run_id, steps = reporter.steps(), "Agent returned");
        self.finalize(error).await
    }

    /// Write the terminal state and announce it.
    async fn finalize(&self, error: Option<RunError>) -> RunOutcome {
        let project = &self.request.project_name;
        let run_id = self.request.run_id;

        let stored = {
            let _guard = self.services.locks.lock(project).await;
            match self.services.store.get(project).await {
                Ok(Some(mut state)) if state.is_owned_by(run_id) => {
                    state.finalize(error.clone());
                    self.services.store.put(&state).await.map(|_| true)
                }
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            }
        };

        match stored {
            Ok(true) => {}
            Ok(false) => {
                warn!(project = %project, run_id = %run_id, "State row no longer belongs to run, not finalizing");
                return RunOutcome::Superseded;
            }
            Err(e) => return self.terminal_write_failed(e, error),
        }

        match error {
            None => {
                info!(project = %project, run_id = %run_id, "Run completed");
                self.services.bus.publish(ProgressEvent::info(
                    project.clone(),
                    run_id,
                    format!("Run {run_id} completed"),
                ));
                RunOutcome::Succeeded
            }
            Some(err) => {
                info!(project = %project, run_id = %run_id, error = %err, "Run failed");
                self.services.bus.publish(ProgressEvent::warning(
                    project.clone(),
                    run_id,
                    format!("Run {run_id} failed: {}", err.message),
                ));
                RunOutcome::Failed(err)
            }
        }
    }

    fn terminal_write_failed(&self, e: StoreError, error: Option<RunError>) -> RunOutcome {
        let project = &self.request.project_name;
        let run_id = self.request.run_id;
        error!(project = %project, run_id = %run_id, error = %e, run_error = ?error, "Failed to persist terminal state");

        let mut message = format!("could not persist terminal state: {e}");
        if let Some(run_error) = &error {
            message.push_str(&format!(" (run failed: {})", run_error.message));
        }
        self.services.bus.publish(ProgressEvent::warning(
            project.clone(),
            run_id,
            format!("Run {run_id} {message}"),
        ));
        RunOutcome::Failed(RunError::new(RunErrorKind::Storage, message))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent panicked".to_string()
    }
}

/// Handle through which an agent reports progress for its run.
#[derive(Clone)]
pub struct StepReporter {
    services: RunServices,
    project: ProjectName,
    run_id: RunId,
    steps: Arc<AtomicU64>,
}

impl StepReporter {
    fn new(services: RunServices, project: ProjectName, run_id: RunId) -> Self {
        Self {
            services,
            project,
            run_id,
            steps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Project being worked on.
    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    /// Run being reported.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Number of steps recorded so far.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Persist a reasoning step and announce it.
    ///
    /// Fails with [`AgentError::Superseded`] once the state row belongs to
    /// another run, and with [`AgentError::Storage`] if it cannot be written.
    pub async fn step(&self, update: StepUpdate) -> Result<(), AgentError> {
        let state = {
            let _guard = self.services.locks.lock(&self.project).await;
            let mut state = self
                .services
                .store
                .get(&self.project)
                .await?
                .filter(|s| s.is_owned_by(self.run_id))
                .ok_or_else(|| AgentError::Superseded {
                    project: self.project.clone(),
                    run_id: self.run_id,
                })?;

            state.token_usage = state.token_usage.saturating_add(update.tokens_used);
            if let Some(session) = &update.browser_session {
                state.browser_session = Some(session.clone());
            }
            if let Some(session) = &update.terminal_session {
                state.terminal_session = Some(session.clone());
            }
            state.touch();
            self.services.store.put(&state).await?;
            state
        };

        let step = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            project = %self.project,
            run_id = %self.run_id,
            step,
            token_usage = state.token_usage,
            "Step recorded"
        );

        let bus = &self.services.bus;
        let summarized = update.log.is_none() && update.terminal_session.is_none();
        if let Some(line) = update.log {
            bus.publish(ProgressEvent::log(self.project.clone(), self.run_id, line));
        }
        if let Some(session) = update.terminal_session {
            bus.publish(ProgressEvent::terminal(self.project.clone(), self.run_id, session));
        }
        if summarized {
            bus.publish(ProgressEvent::info(
                self.project.clone(),
                self.run_id,
                format!("Step {step} recorded, {} tokens used", state.token_usage),
            ));
        }
        Ok(())
    }

    /// Publish a log line without touching the state row.
    pub fn log(&self, line: impl Into<String>) {
        self.services
            .bus
            .publish(ProgressEvent::log(self.project.clone(), self.run_id, line));
    }
}
