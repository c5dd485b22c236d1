//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_bind_addr: String,

    /// SQLite database holding project states. In-memory when unset.
    pub database_path: Option<PathBuf>,

    /// Executable invoked for each run.
    pub agent_command: String,

    /// Extra arguments passed to the agent before the task message.
    pub agent_args: Vec<String>,

    /// Working directory for agent processes.
    pub agent_workdir: PathBuf,

    /// Deadline after which a run is force-finalized (seconds). No deadline when unset.
    pub run_timeout_secs: Option<u64>,

    /// How many times a failed state read is retried before a submission fails.
    pub store_read_retries: u32,

    /// Delay between state read retries (milliseconds).
    pub store_retry_backoff_ms: u64,

    /// Per-project progress channel capacity.
    pub progress_channel_capacity: usize,
}

impl Config {
    /// Run deadline as a Duration.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Read retry backoff as a Duration.
    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "127.0.0.1:1337".to_string(),
            database_path: None,
            agent_command: "agentrun-agent".to_string(),
            agent_args: Vec::new(),
            agent_workdir: PathBuf::from("."),
            run_timeout_secs: Some(3600),
            store_read_retries: 3,
            store_retry_backoff_ms: 50,
            progress_channel_capacity: 256,
        }
    }
}
