//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use agentrun_core::{ProjectName, ProjectState, RunId, RunMode};

use crate::agent::{Agent, AgentError, AgentRun, StepUpdate};
use crate::store::{InMemoryStateStore, StateStore, StoreError};

/// What a [`ScriptedAgent`] does once its steps are recorded.
#[derive(Clone)]
pub enum Ending {
    Succeed,
    Fail(String),
    Panic(&'static str),
    /// Never returns.
    Hang,
}

/// A call the agent received.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: RunMode,
    pub run_id: RunId,
    pub message: String,
    pub prior_state: Option<ProjectState>,
}

/// Agent that records its invocations, reports scripted steps and then
/// waits for a permit on its gate (if any) before ending.
pub struct ScriptedAgent {
    steps: Vec<StepUpdate>,
    ending: Ending,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedAgent {
    pub fn new(ending: Ending) -> Self {
        Self {
            steps: Vec::new(),
            ending,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Ending::Succeed)
    }

    pub fn with_steps(mut self, steps: Vec<StepUpdate>) -> Self {
        self.steps = steps;
        self
    }

    /// Block each run until a permit is added to the returned semaphore.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    async fn play(&self, mode: RunMode, run: AgentRun) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(Invocation {
            mode,
            run_id: run.run_id,
            message: run.message.clone(),
            prior_state: run.prior_state.clone(),
        });

        for step in &self.steps {
            run.reporter.step(step.clone()).await?;
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        match &self.ending {
            Ending::Succeed => Ok(()),
            Ending::Fail(reason) => Err(AgentError::Reasoning(reason.clone())),
            Ending::Panic(message) => panic!("{}", message),
            Ending::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(&self, run: AgentRun) -> Result<(), AgentError> {
        self.play(RunMode::Fresh, run).await
    }

    async fn subsequent_execute(&self, run: AgentRun) -> Result<(), AgentError> {
        self.play(RunMode::Resume, run).await
    }
}

/// In-memory store whose reads and writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStateStore,
    failing_reads: AtomicU32,
    failing_writes: AtomicBool,
    corrupt: AtomicBool,
    reads: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` reads.
    pub fn fail_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fail every write until turned off again.
    pub fn fail_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Report every row as undecodable until turned off again.
    pub fn corrupt_reads(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    /// Reads attempted so far, failed ones included.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, state: &ProjectState) {
        self.inner.put(state).await.unwrap();
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, project: &ProjectName) -> Result<Option<ProjectState>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.corrupt.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                project: project.to_string(),
                reason: "unknown column layout".to_string(),
            });
        }
        let failed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("read refused".to_string()));
        }
        self.inner.get(project).await
    }

    async fn put(&self, state: &ProjectState) -> Result<(), StoreError> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        self.inner.put(state).await
    }

    async fn list(&self) -> Result<Vec<ProjectState>, StoreError> {
        self.inner.list().await
    }
}

pub fn project(name: &str) -> ProjectName {
    ProjectName::new(name).unwrap()
}
