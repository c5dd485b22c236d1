//! Shared application state.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::orchestrator::ExecutionOrchestrator;
use crate::tokens::TokenCounter;

/// Shared application state.
pub struct AppState {
    /// Decides and launches runs; also answers state queries.
    pub orchestrator: Arc<ExecutionOrchestrator>,

    /// Counter backing the token calculation endpoint.
    pub tokens: Arc<dyn TokenCounter>,

    /// When the server started.
    pub started_at: DateTime<Utc>,

    /// Flipped once the server starts shutting down.
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>, tokens: Arc<dyn TokenCounter>) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            tokens,
            started_at: Utc::now(),
            shutdown: watch::Sender::new(false),
        })
    }

    /// Tell long-lived responses to finish.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once shutdown has begun.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown = self.shutdown.subscribe();
        async move {
            let _ = shutdown.wait_for(|closed| *closed).await;
        }
    }

    /// Seconds since the server started.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
