//! Execution orchestrator: decides what a submitted task does.
//!
//! For each project the orchestrator reads the latest [`ProjectState`] and
//! either starts a fresh run, resumes after a completed one, or rejects the
//! task because a worker it launched is still running. The decision, the
//! state write and the worker launch all happen under the project's lock, so
//! concurrent submissions for one project are linearized and at most one
//! worker owns the active row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use agentrun_core::{
    ChatMessage, ProgressEvent, ProjectName, ProjectState, RunError, RunErrorKind, RunId, RunMode,
    SubmitOutcome,
};

use crate::agent::{Agent, ProjectManager};
use crate::bus::{ProgressBus, ProgressSubscription};
use crate::config::Config;
use crate::locks::ProjectLocks;
use crate::store::{StateStore, StoreError};
use crate::worker::{RunOutcome, RunServices, RunRequest, TaskWorker};

/// Submission errors. Neither launches a worker.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Submission failed: {0}")]
    StorageUnavailable(#[source] StoreError),

    /// The stored row cannot be decoded; it has to be repaired or removed.
    #[error("Submission failed: {0}")]
    CorruptState(#[source] StoreError),

    #[error("Project '{project}' has used up its run ids (last run {run_id})")]
    RunIdsExhausted { project: ProjectName, run_id: RunId },
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { .. } => Self::CorruptState(err),
            StoreError::Unavailable(_) => Self::StorageUnavailable(err),
        }
    }
}

/// What a submission did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub outcome: SubmitOutcome,
    /// Run that was launched, or the run still in progress when rejected.
    pub run_id: RunId,
}

/// A worker launched by this process.
struct LiveRun {
    run_id: RunId,
    handle: JoinHandle<RunOutcome>,
}

/// Owns the single-worker-per-project invariant.
pub struct ExecutionOrchestrator {
    services: RunServices,
    agent: Arc<dyn Agent>,
    projects: Arc<dyn ProjectManager>,
    run_timeout: Option<Duration>,
    read_retries: u32,
    retry_backoff: Duration,
    live: RwLock<HashMap<ProjectName, LiveRun>>,
}

impl ExecutionOrchestrator {
    /// Create an orchestrator with no run deadline and no read retries.
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: Arc<ProgressBus>,
        agent: Arc<dyn Agent>,
        projects: Arc<dyn ProjectManager>,
    ) -> Self {
        Self {
            services: RunServices {
                store,
                bus,
                locks: Arc::new(ProjectLocks::new()),
            },
            agent,
            projects,
            run_timeout: None,
            read_retries: 0,
            retry_backoff: Duration::ZERO,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Apply the run deadline and retry policy from `config`.
    pub fn with_config(self, config: &Config) -> Self {
        self.with_run_timeout(config.run_timeout())
            .with_read_retries(config.store_read_retries, config.store_retry_backoff())
    }

    /// Force-finalize runs that exceed `timeout`.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Retry failed state reads during submission.
    pub fn with_read_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.read_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Submit a task for `project`.
    ///
    /// Returns as soon as the worker is scheduled; never waits for the run.
    pub async fn submit(&self, project: &str, message: &str) -> Result<SubmitReceipt, SubmitError> {
        let project =
            ProjectName::new(project).map_err(|e| SubmitError::InvalidRequest(e.to_string()))?;
        if message.trim().is_empty() {
            return Err(SubmitError::InvalidRequest(
                "task message must not be empty".to_string(),
            ));
        }

        let _guard = self.services.locks.lock(&project).await;
        let current = self.read_state(&project).await?;

        let (state, mode, prior_state, outcome) = match current {
            None => {
                let state = ProjectState::fresh(project.clone());
                (state, RunMode::Fresh, None, SubmitOutcome::Accepted)
            }
            Some(prior) if prior.completed => {
                let next = prior.run_id.next().ok_or_else(|| SubmitError::RunIdsExhausted {
                    project: project.clone(),
                    run_id: prior.run_id,
                })?;
                let mut state = prior.clone();
                state.begin_run(next);
                (state, RunMode::Resume, Some(prior), SubmitOutcome::Resumed)
            }
            Some(mut state) => {
                self.services.bus.publish(ProgressEvent::warning(
                    project.clone(),
                    state.run_id,
                    format!(
                        "Run {} of project '{}' has not completed yet",
                        state.run_id, project
                    ),
                ));

                if let Some(run_id) = self.live_run(&project).await {
                    info!(project = %project, run_id = %run_id, "Run still in progress, rejecting task");
                    return Ok(SubmitReceipt {
                        outcome: SubmitOutcome::Rejected,
                        run_id,
                    });
                }

                warn!(
                    project = %project,
                    run_id = %state.run_id,
                    active = state.agent_is_active,
                    "No live worker for unfinished run, restarting it"
                );
                state.restart();
                (state, RunMode::Fresh, None, SubmitOutcome::Accepted)
            }
        };

        self.services.store.put(&state).await?;

        let run_id = state.run_id;
        let worker = TaskWorker::new(
            self.services.clone(),
            self.agent.clone(),
            self.run_timeout,
            RunRequest {
                project_name: project.clone(),
                run_id,
                mode,
                message: message.to_string(),
                prior_state,
            },
        );
        let handle = worker.spawn();
        {
            let mut live = self.live.write().await;
            live.retain(|_, run| !run.handle.is_finished());
            live.insert(project.clone(), LiveRun { run_id, handle });
        }

        info!(project = %project, run_id = %run_id, outcome = ?outcome, "Task submitted");
        Ok(SubmitReceipt { outcome, run_id })
    }

    async fn read_state(&self, project: &ProjectName) -> Result<Option<ProjectState>, StoreError> {
        let mut attempt = 0;
        loop {
            match self.services.store.get(project).await {
                Ok(state) => return Ok(state),
                Err(e @ StoreError::Unavailable(_)) if attempt < self.read_retries => {
                    attempt += 1;
                    warn!(project = %project, attempt, error = %e, "State read failed, retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e @ StoreError::Corrupt { .. }) => {
                    error!(
                        project = %project,
                        error = %e,
                        "Stored state is unreadable; repair or delete the project's row to submit again"
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(project = %project, error = %e, "State read failed");
                    return Err(e);
                }
            }
        }
    }

    /// Run id of the project's worker if it is still running.
    async fn live_run(&self, project: &ProjectName) -> Option<RunId> {
        self.live
            .read()
            .await
            .get(project)
            .filter(|run| !run.handle.is_finished())
            .map(|run| run.run_id)
    }

    /// Latest state row of `project`.
    pub async fn latest_state(
        &self,
        project: &ProjectName,
    ) -> Result<Option<ProjectState>, StoreError> {
        self.services.store.get(project).await
    }

    /// Whether the project's row says a worker is active.
    pub async fn is_agent_active(&self, project: &ProjectName) -> Result<bool, StoreError> {
        Ok(self
            .latest_state(project)
            .await?
            .is_some_and(|state| state.agent_is_active))
    }

    /// Tokens consumed by the project's latest run.
    pub async fn token_usage(&self, project: &ProjectName) -> Result<u64, StoreError> {
        Ok(self
            .latest_state(project)
            .await?
            .map_or(0, |state| state.token_usage))
    }

    /// Latest browser snapshot.
    pub async fn browser_session(&self, project: &ProjectName) -> Result<Option<Value>, StoreError> {
        Ok(self
            .latest_state(project)
            .await?
            .and_then(|state| state.browser_session))
    }

    /// Latest terminal snapshot.
    pub async fn terminal_session(
        &self,
        project: &ProjectName,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .latest_state(project)
            .await?
            .and_then(|state| state.terminal_session))
    }

    /// Conversation history of `project`.
    pub async fn messages(&self, project: &ProjectName) -> Vec<ChatMessage> {
        self.projects.get_messages(project).await
    }

    /// Every project's latest state.
    pub async fn list_projects(&self) -> Result<Vec<ProjectState>, StoreError> {
        self.services.store.list().await
    }

    /// Subscribe to the project's live progress.
    pub fn subscribe(&self, project: &ProjectName) -> ProgressSubscription {
        self.services.bus.subscribe(project)
    }

    /// The bus progress is published on.
    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.services.bus
    }

    /// Number of workers still running.
    pub async fn live_runs(&self) -> usize {
        self.live
            .read()
            .await
            .values()
            .filter(|run| !run.handle.is_finished())
            .count()
    }

    /// Wait for the project's most recent worker and forget it.
    ///
    /// Returns `None` if no worker is registered for the project (none was
    /// launched, or it finished and was pruned by a later submission) or it
    /// was aborted.
    pub async fn join_run(&self, project: &ProjectName) -> Option<RunOutcome> {
        let run = self.live.write().await.remove(project)?;
        run.handle.await.ok()
    }

    /// Abort every running worker and finalize its row.
    pub async fn shutdown(&self) {
        let runs: Vec<(ProjectName, LiveRun)> = self.live.write().await.drain().collect();
        for (project, run) in runs {
            if run.handle.is_finished() {
                continue;
            }
            run.handle.abort();
            let _ = run.handle.await;
            self.abandon(&project, run.run_id).await;
        }
    }

    async fn abandon(&self, project: &ProjectName, run_id: RunId) {
        let _guard = self.services.locks.lock(project).await;
        let mut state = match self.services.store.get(project).await {
            Ok(Some(state)) if state.is_owned_by(run_id) => state,
            Ok(_) => return,
            Err(e) => {
                error!(project = %project, run_id = %run_id, error = %e, "Failed to read state of aborted run");
                return;
            }
        };

        let reason = RunError::new(RunErrorKind::Reasoning, "orchestrator shutting down");
        state.finalize(Some(reason));
        match self.services.store.put(&state).await {
            Ok(()) => {
                debug!(project = %project, run_id = %run_id, "Aborted run finalized");
                self.services.bus.publish(ProgressEvent::warning(
                    project.clone(),
                    run_id,
                    format!("Run {run_id} aborted: orchestrator shutting down"),
                ));
            }
            Err(e) => {
                error!(project = %project, run_id = %run_id, error = %e, "Failed to finalize aborted run")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{InMemoryProjectManager, StepUpdate};
    use crate::store::InMemoryStateStore;
    use crate::testing::{project, Ending, FlakyStore, ScriptedAgent};
    use agentrun_core::{EventKind, ProgressPayload};
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn orchestrator(store: Arc<dyn StateStore>, agent: Arc<ScriptedAgent>) -> ExecutionOrchestrator {
        ExecutionOrchestrator::new(
            store,
            Arc::new(ProgressBus::default()),
            agent,
            Arc::new(InMemoryProjectManager::new()),
        )
    }

    fn completed(name: &str, run_id: u64) -> ProjectState {
        let mut state = ProjectState::fresh(project(name));
        state.begin_run(RunId::new(run_id));
        state.token_usage = 900;
        state.terminal_session = Some(json!({"command": "cargo test"}));
        state.finalize(None);
        state
    }

    #[tokio::test]
    async fn test_first_submission_starts_fresh_and_completes() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(store.clone(), agent.clone());

        let receipt = orch.submit("proj-a", "build a todo app").await.unwrap();
        assert_eq!(
            receipt,
            SubmitReceipt {
                outcome: SubmitOutcome::Accepted,
                run_id: RunId::INITIAL
            }
        );

        // Visible as active before the worker gets a chance to finish.
        let state = orch.latest_state(&project("proj-a")).await.unwrap().unwrap();
        assert!(state.agent_is_active || state.completed);
        assert_eq!(state.run_id, RunId::INITIAL);

        assert_eq!(
            orch.join_run(&project("proj-a")).await,
            Some(RunOutcome::Succeeded)
        );
        let state = store.get(&project("proj-a")).await.unwrap().unwrap();
        assert!(state.completed);
        assert!(!state.agent_is_active);
        assert!(state.error.is_none());

        let calls = agent.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].mode, RunMode::Fresh);
        assert_eq!(calls[0].message, "build a todo app");
    }

    #[tokio::test]
    async fn test_active_immediately_after_submit() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let (agent, gate) = ScriptedAgent::succeeding().gated();
        let orch = orchestrator(store, Arc::new(agent));

        orch.submit("proj", "build a todo app").await.unwrap();
        assert!(orch.is_agent_active(&project("proj")).await.unwrap());
        assert_eq!(orch.live_runs().await, 1);

        gate.add_permits(1);
        orch.join_run(&project("proj")).await.unwrap();
        assert!(!orch.is_agent_active(&project("proj")).await.unwrap());
        assert_eq!(orch.live_runs().await, 0);
    }

    #[tokio::test]
    async fn test_completed_run_is_resumed_with_next_id() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        store.put(&completed("proj-b", 2)).await.unwrap();
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(store.clone(), agent.clone());

        let receipt = orch.submit("proj-b", "fix bug").await.unwrap();
        assert_eq!(receipt.outcome, SubmitOutcome::Resumed);
        assert_eq!(receipt.run_id, RunId::new(3));

        orch.join_run(&project("proj-b")).await.unwrap();
        let state = store.get(&project("proj-b")).await.unwrap().unwrap();
        assert_eq!(state.run_id, RunId::new(3));
        assert!(state.completed);
        assert_eq!(state.token_usage, 0);
        assert_eq!(state.terminal_session, Some(json!({"command": "cargo test"})));

        let calls = agent.calls();
        assert_eq!(calls[0].mode, RunMode::Resume);
        let prior = calls[0].prior_state.as_ref().expect("prior state handed over");
        assert_eq!(prior.run_id, RunId::new(2));
        assert_eq!(prior.token_usage, 900);
    }

    #[tokio::test]
    async fn test_failing_agent_leaves_error_on_row() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let agent = Arc::new(ScriptedAgent::new(Ending::Fail(
            "LLM returned garbage".to_string(),
        )));
        let orch = orchestrator(store.clone(), agent);

        orch.submit("proj-c", "refactor").await.unwrap();
        let outcome = orch.join_run(&project("proj-c")).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));

        let state = store.get(&project("proj-c")).await.unwrap().unwrap();
        assert!(state.completed);
        assert!(!state.agent_is_active);
        assert!(!state.error.unwrap().message.is_empty());
    }

    #[tokio::test]
    async fn test_live_run_rejects_and_warns() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let (agent, gate) = ScriptedAgent::succeeding().gated();
        let agent = Arc::new(agent);
        let orch = orchestrator(store.clone(), agent.clone());

        orch.submit("proj", "build a todo app").await.unwrap();
        let mut events = orch.subscribe(&project("proj"));

        let receipt = orch.submit("proj", "also add dark mode").await.unwrap();
        assert_eq!(receipt.outcome, SubmitOutcome::Rejected);
        assert_eq!(receipt.run_id, RunId::INITIAL);

        let warning = loop {
            let event = events.next().await.unwrap();
            if event.kind() == EventKind::Warning {
                break event;
            }
        };
        assert!(matches!(
            warning.payload,
            ProgressPayload::Warning { ref message } if message.contains("not completed")
        ));

        gate.add_permits(1);
        orch.join_run(&project("proj")).await.unwrap();
        assert_eq!(agent.calls().len(), 1);

        let state = store.get(&project("proj")).await.unwrap().unwrap();
        assert_eq!(state.run_id, RunId::INITIAL);
        assert!(state.completed);
    }

    #[tokio::test]
    async fn test_stale_row_restarts_with_same_id() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let mut stale = ProjectState::fresh(project("proj"));
        stale.begin_run(RunId::new(4));
        stale.token_usage = 77;
        stale.browser_session = Some(json!({"url": "http://stale"}));
        stale.terminal_session = Some(json!({"command": "old"}));
        store.put(&stale).await.unwrap();

        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(store.clone(), agent.clone());
        let mut events = orch.subscribe(&project("proj"));

        let receipt = orch.submit("proj", "continue").await.unwrap();
        assert_eq!(receipt.outcome, SubmitOutcome::Accepted);
        assert_eq!(receipt.run_id, RunId::new(4));
        assert_eq!(events.next().await.unwrap().kind(), EventKind::Warning);

        orch.join_run(&project("proj")).await.unwrap();
        let state = store.get(&project("proj")).await.unwrap().unwrap();
        assert_eq!(state.run_id, RunId::new(4));
        assert!(state.completed);
        assert_eq!(state.token_usage, 0);
        assert!(state.browser_session.is_none());
        assert!(state.terminal_session.is_none());
        assert_eq!(agent.calls()[0].mode, RunMode::Fresh);
        assert!(agent.calls()[0].prior_state.is_none());
    }

    #[tokio::test]
    async fn test_restart_is_visible_before_the_agent_reports() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let mut stale = ProjectState::fresh(project("proj"));
        stale.browser_session = Some(json!({"url": "http://stale"}));
        stale.terminal_session = Some(json!({"command": "old"}));
        store.put(&stale).await.unwrap();

        let orch = orchestrator(store, Arc::new(ScriptedAgent::new(Ending::Hang)));
        orch.submit("proj", "start over").await.unwrap();

        let name = project("proj");
        assert!(orch.browser_session(&name).await.unwrap().is_none());
        assert!(orch.terminal_session(&name).await.unwrap().is_none());
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_run_ids_refuse_resumption() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let last = completed("proj", u64::MAX);
        store.put(&last).await.unwrap();
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(store.clone(), agent.clone());

        let err = orch.submit("proj", "one more").await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::RunIdsExhausted { run_id, .. } if run_id == RunId::new(u64::MAX)
        ));
        assert_eq!(store.get(&project("proj")).await.unwrap(), Some(last));
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_not_reported_as_unavailable() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.corrupt_reads(true);
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(flaky.clone(), agent.clone())
            .with_read_retries(3, Duration::ZERO);

        let err = orch.submit("proj", "build a todo app").await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::CorruptState(StoreError::Corrupt { .. })
        ));
        assert_eq!(flaky.reads(), 1, "corrupt rows are not retried");
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_finished_workers_are_pruned() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let orch = orchestrator(store, Arc::new(ScriptedAgent::succeeding()));

        for i in 0..5 {
            orch.submit(&format!("proj-{i}"), "build").await.unwrap();
            while orch.live_runs().await > 0 {
                tokio::task::yield_now().await;
            }
        }
        orch.submit("last", "build").await.unwrap();

        assert_eq!(orch.live.read().await.len(), 1);
        assert!(orch.join_run(&project("last")).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_launch_one_worker() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let (agent, gate) = ScriptedAgent::succeeding()
            .with_steps(vec![StepUpdate::new().with_tokens(5)])
            .gated();
        let agent = Arc::new(agent);
        let orch = Arc::new(orchestrator(store.clone(), agent.clone()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let orch = orch.clone();
            handles.push(tokio::spawn(async move {
                orch.submit("proj", &format!("task {i}")).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            let receipt = handle.await.unwrap();
            assert_eq!(receipt.run_id, RunId::INITIAL);
            match receipt.outcome {
                SubmitOutcome::Accepted => accepted += 1,
                SubmitOutcome::Rejected => {}
                SubmitOutcome::Resumed => panic!("nothing completed yet"),
            }
        }
        assert_eq!(accepted, 1);

        gate.add_permits(1);
        orch.join_run(&project("proj")).await.unwrap();
        assert_eq!(agent.calls().len(), 1);

        let states = store.list().await.unwrap();
        assert_eq!(states.len(), 1);
        let state = &states[0];
        assert!(state.is_consistent());
        assert!(state.completed);
        assert_eq!(state.run_id, RunId::INITIAL);
        assert_eq!(state.token_usage, 5);
    }

    #[tokio::test]
    async fn test_invalid_requests_launch_nothing() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(store.clone(), agent.clone());

        let err = orch.submit("proj", "   ").await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidRequest(_)));

        let err = orch.submit("", "build a todo app").await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidRequest(_)));

        let err = orch.submit("a/b", "build a todo app").await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidRequest(_)));

        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(orch.live_runs().await, 0);
        assert!(agent.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_failures_are_retried() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.fail_reads(2);
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(flaky.clone(), agent)
            .with_read_retries(3, Duration::from_millis(50));

        let receipt = orch.submit("proj", "build a todo app").await.unwrap();
        assert_eq!(receipt.outcome, SubmitOutcome::Accepted);
        orch.join_run(&project("proj")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_store_fails_submission() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.fail_reads(10);
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(flaky.clone(), agent.clone())
            .with_read_retries(3, Duration::from_millis(50));

        let err = orch.submit("proj", "build a todo app").await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::StorageUnavailable(StoreError::Unavailable(_))
        ));
        assert_eq!(orch.live_runs().await, 0);
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_fails_submission() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.fail_writes(true);
        let agent = Arc::new(ScriptedAgent::succeeding());
        let orch = orchestrator(flaky.clone(), agent.clone());

        let err = orch.submit("proj", "build a todo app").await.unwrap_err();
        assert!(matches!(err, SubmitError::StorageUnavailable(_)));
        assert!(orch.join_run(&project("proj")).await.is_none());
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_queries_reflect_recorded_steps() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let agent = Arc::new(ScriptedAgent::succeeding().with_steps(vec![
            StepUpdate::new()
                .with_tokens(120)
                .with_browser_session(json!({"url": "http://localhost:5173"})),
            StepUpdate::new()
                .with_tokens(30)
                .with_terminal_session(json!({"command": "npm run dev"})),
        ]));
        let orch = orchestrator(store, agent);

        orch.submit("proj", "build a todo app").await.unwrap();
        orch.join_run(&project("proj")).await.unwrap();

        let name = project("proj");
        assert_eq!(orch.token_usage(&name).await.unwrap(), 150);
        assert_eq!(
            orch.browser_session(&name).await.unwrap(),
            Some(json!({"url": "http://localhost:5173"}))
        );
        assert_eq!(
            orch.terminal_session(&name).await.unwrap(),
            Some(json!({"command": "npm run dev"}))
        );
        assert_eq!(orch.list_projects().await.unwrap().len(), 1);

        let unknown = project("unknown");
        assert!(!orch.is_agent_active(&unknown).await.unwrap());
        assert_eq!(orch.token_usage(&unknown).await.unwrap(), 0);
        assert!(orch.latest_state(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_finalizes_running_workers() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let agent = Arc::new(ScriptedAgent::new(Ending::Hang));
        let orch = orchestrator(store.clone(), agent);

        orch.submit("proj", "build a todo app").await.unwrap();
        assert_eq!(orch.live_runs().await, 1);

        orch.shutdown().await;
        assert_eq!(orch.live_runs().await, 0);

        let state = store.get(&project("proj")).await.unwrap().unwrap();
        assert!(state.completed);
        assert!(!state.agent_is_active);
        assert_eq!(state.error.unwrap().message, "orchestrator shutting down");
    }

    #[tokio::test]
    async fn test_next_submission_after_shutdown_resumes() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let orch = orchestrator(store.clone(), Arc::new(ScriptedAgent::new(Ending::Hang)));
        orch.submit("proj", "build a todo app").await.unwrap();
        orch.shutdown().await;

        let orch = orchestrator(store, Arc::new(ScriptedAgent::succeeding()));
        let receipt = orch.submit("proj", "try again").await.unwrap();
        assert_eq!(receipt.outcome, SubmitOutcome::Resumed);
        assert_eq!(receipt.run_id, RunId::new(1));
    }
}
