//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use tracing::warn;

use agentrun_core::RunPhase;

use crate::state::AppState;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_project_metrics(state, &mut output).await;
    collect_runtime_metrics(state, &mut output).await;

    output
}

/// Collect project metrics by run phase.
async fn collect_project_metrics(state: &Arc<AppState>, output: &mut String) {
    let projects = match state.orchestrator.list_projects().await {
        Ok(projects) => projects,
        Err(e) => {
            warn!(error = %e, "Failed to list projects for metrics");
            Vec::new()
        }
    };

    let mut running = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;
    let mut interrupted = 0u64;
    let mut tokens = 0u64;

    for project in &projects {
        match project.phase() {
            RunPhase::Running => running += 1,
            RunPhase::Succeeded => succeeded += 1,
            RunPhase::Failed => failed += 1,
            RunPhase::Interrupted => interrupted += 1,
        }
        tokens = tokens.saturating_add(project.token_usage);
    }

    writeln!(
        output,
        "# HELP agentrun_projects Number of projects by phase of their latest run"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_projects gauge").ok();
    for (phase, count) in [
        (RunPhase::Running, running),
        (RunPhase::Succeeded, succeeded),
        (RunPhase::Failed, failed),
        (RunPhase::Interrupted, interrupted),
    ] {
        writeln!(output, "agentrun_projects{{phase=\"{}\"}} {count}", phase.as_str()).ok();
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP agentrun_run_tokens Tokens used by the latest run of every project"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_run_tokens gauge").ok();
    writeln!(output, "agentrun_run_tokens {tokens}").ok();
}

/// Collect worker and subscriber gauges.
async fn collect_runtime_metrics(state: &Arc<AppState>, output: &mut String) {
    let live = state.orchestrator.live_runs().await;
    let subscribers = state.orchestrator.bus().total_subscribers();

    writeln!(output).ok();
    writeln!(output, "# HELP agentrun_live_workers Workers currently running").ok();
    writeln!(output, "# TYPE agentrun_live_workers gauge").ok();
    writeln!(output, "agentrun_live_workers {live}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP agentrun_progress_subscribers Connected progress subscribers"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_progress_subscribers gauge").ok();
    writeln!(output, "agentrun_progress_subscribers {subscribers}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InMemoryProjectManager;
    use crate::bus::ProgressBus;
    use crate::orchestrator::ExecutionOrchestrator;
    use crate::store::{InMemoryStateStore, StateStore};
    use crate::testing::{project, Ending, ScriptedAgent};
    use crate::tokens::EstimatingTokenCounter;

    fn app_state(store: Arc<dyn StateStore>, agent: ScriptedAgent) -> Arc<AppState> {
        let orchestrator = ExecutionOrchestrator::new(
            store,
            Arc::new(ProgressBus::default()),
            Arc::new(agent),
            Arc::new(InMemoryProjectManager::new()),
        );
        AppState::new(Arc::new(orchestrator), Arc::new(EstimatingTokenCounter))
    }

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = app_state(
            Arc::new(InMemoryStateStore::new()),
            ScriptedAgent::succeeding(),
        );
        let output = collect_metrics(&state).await;

        assert!(output.contains("# TYPE agentrun_projects gauge"));
        assert!(output.contains("agentrun_projects{phase=\"running\"} 0"));
        assert!(output.contains("agentrun_projects{phase=\"failed\"} 0"));
        assert!(output.contains("agentrun_run_tokens 0"));
        assert!(output.contains("agentrun_live_workers 0"));
        assert!(output.contains("agentrun_progress_subscribers 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_phases() {
        let state = app_state(
            Arc::new(InMemoryStateStore::new()),
            ScriptedAgent::new(Ending::Fail("boom".to_string())),
        );
        state.orchestrator.submit("proj", "build").await.unwrap();
        state.orchestrator.join_run(&project("proj")).await.unwrap();
        let _subscription = state.orchestrator.subscribe(&project("proj"));

        let output = collect_metrics(&state).await;
        assert!(output.contains("agentrun_projects{phase=\"failed\"} 1"));
        assert!(output.contains("agentrun_projects{phase=\"succeeded\"} 0"));
        assert!(output.contains("agentrun_progress_subscribers 1"));
    }
}
