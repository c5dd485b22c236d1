//! agentrun Control Plane Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentrun_control_plane::agent::{CommandAgent, InMemoryProjectManager};
use agentrun_control_plane::tokens::{default_counter, TokenCounter};
use agentrun_control_plane::{
    http, AppState, Config, ExecutionOrchestrator, InMemoryStateStore, ProgressBus,
    SqliteStateStore, StateStore,
};

/// agentrun control plane: runs agents per project and streams their progress.
#[derive(Parser, Debug)]
#[command(name = "agentrun-control-plane", about = "Per-project agent run orchestration server")]
struct Args {
    /// HTTP server address
    #[arg(long, env = "AGENTRUN_HTTP_ADDR")]
    http_addr: Option<String>,

    /// SQLite database for project states (in-memory if omitted)
    #[arg(long, env = "AGENTRUN_DATABASE")]
    database: Option<PathBuf>,

    /// Agent executable invoked for each run
    #[arg(long, env = "AGENTRUN_AGENT_COMMAND")]
    agent_command: Option<String>,

    /// Extra argument passed to the agent (repeatable)
    #[arg(long = "agent-arg", env = "AGENTRUN_AGENT_ARGS", value_delimiter = ' ')]
    agent_args: Vec<String>,

    /// Working directory for agent processes
    #[arg(long, env = "AGENTRUN_AGENT_WORKDIR")]
    agent_workdir: Option<PathBuf>,

    /// Run deadline in seconds (0 disables it)
    #[arg(long, env = "AGENTRUN_RUN_TIMEOUT_SECS")]
    run_timeout_secs: Option<u64>,

    /// State read retries before a submission fails
    #[arg(long, env = "AGENTRUN_STORE_READ_RETRIES")]
    store_read_retries: Option<u32>,

    /// Per-project progress channel capacity
    #[arg(long, env = "AGENTRUN_PROGRESS_CAPACITY")]
    progress_capacity: Option<usize>,
}

impl Args {
    /// Overlay the given arguments on the default configuration.
    fn into_config(self) -> Config {
        let mut config = Config::default();
        if let Some(addr) = self.http_addr {
            config.http_bind_addr = addr;
        }
        if self.database.is_some() {
            config.database_path = self.database;
        }
        if let Some(command) = self.agent_command {
            config.agent_command = command;
        }
        if !self.agent_args.is_empty() {
            config.agent_args = self.agent_args;
        }
        if let Some(dir) = self.agent_workdir {
            config.agent_workdir = dir;
        }
        if let Some(secs) = self.run_timeout_secs {
            config.run_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(retries) = self.store_read_retries {
            config.store_read_retries = retries;
        }
        if let Some(capacity) = self.progress_capacity {
            config.progress_channel_capacity = capacity;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("agentrun=info".parse()?))
        .with_target(true)
        .init();

    let config = Args::parse().into_config();
    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    // Open the state store
    let store: Arc<dyn StateStore> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "Opening SQLite state store");
            Arc::new(SqliteStateStore::open(path)?)
        }
        None => {
            warn!("No database configured - project states are kept in memory only");
            Arc::new(InMemoryStateStore::new())
        }
    };

    // Wire the agent
    let tokens: Arc<dyn TokenCounter> = Arc::from(default_counter());
    let projects = Arc::new(InMemoryProjectManager::new());
    let agent = CommandAgent::new(config.agent_command.clone(), projects.clone())
        .with_args(config.agent_args.clone())
        .with_working_dir(config.agent_workdir.clone())
        .with_token_counter(tokens.clone());

    let bus = Arc::new(ProgressBus::new(config.progress_channel_capacity));
    let orchestrator = Arc::new(
        ExecutionOrchestrator::new(store, bus, Arc::new(agent), projects).with_config(&config),
    );

    let state = AppState::new(orchestrator.clone(), tokens);

    info!(
        http_addr = %http_addr,
        agent = %config.agent_command,
        run_timeout_secs = ?config.run_timeout_secs,
        "Starting agentrun control plane"
    );

    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    http::serve(listener, state, shutdown_signal()).await?;

    info!("HTTP server stopped, finalizing live runs");
    orchestrator.shutdown().await;
    info!("agentrun control plane stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
