//! Agent backed by an external executable.
//!
//! The executable receives the task message as its last argument and
//! reports progress as line-delimited JSON on stdout (see [`AgentLine`]).
//! Lines that are not JSON are forwarded as log events. stderr is logged.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use agentrun_core::ChatMessage;

use super::{Agent, AgentError, AgentRun, InMemoryProjectManager, ProjectManager, StepUpdate};
use crate::tokens::{EstimatingTokenCounter, TokenCounter};

/// One line of agent output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentLine {
    /// Free-form log line.
    Log { message: String },
    /// Tokens consumed since the previous usage line.
    Usage { tokens: u64 },
    /// New browser snapshot.
    Browser { session: Value },
    /// New terminal snapshot.
    Terminal { session: Value },
    /// Text addressed to the user.
    Reply { content: String },
}

/// Runs each task as a child process.
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env_vars: Vec<(String, String)>,
    projects: Arc<InMemoryProjectManager>,
    tokens: Arc<dyn TokenCounter>,
}

impl CommandAgent {
    /// Create an agent running `program`.
    pub fn new(program: impl Into<String>, projects: Arc<InMemoryProjectManager>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            env_vars: Vec::new(),
            projects,
            tokens: Arc::new(EstimatingTokenCounter),
        }
    }

    /// Set arguments passed before the task message.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the working directory of the child process.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set the counter used to price replies.
    pub fn with_token_counter(mut self, tokens: Arc<dyn TokenCounter>) -> Self {
        self.tokens = tokens;
        self
    }

    async fn run_process(&self, run: AgentRun, resume: bool) -> Result<(), AgentError> {
        let AgentRun {
            project_name,
            run_id,
            message,
            prior_state,
            reporter,
        } = run;

        let history = if resume {
            self.projects.get_messages(&project_name).await
        } else {
            Vec::new()
        };
        self.projects
            .record(&project_name, ChatMessage::user(message.clone()))
            .await;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if resume {
            cmd.arg("--resume");
        }
        cmd.arg(&message);

        cmd.env("AGENTRUN_PROJECT", project_name.as_str())
            .env("AGENTRUN_RUN_ID", run_id.to_string());
        if resume {
            let history_json = serde_json::to_string(&history)
                .map_err(|e| AgentError::Reasoning(format!("failed to encode history: {e}")))?;
            cmd.env("AGENTRUN_HISTORY", history_json);
            if let Some(prior) = &prior_state {
                let prior_json = serde_json::to_string(prior)
                    .map_err(|e| AgentError::Reasoning(format!("failed to encode state: {e}")))?;
                cmd.env("AGENTRUN_PRIOR_STATE", prior_json);
            }
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true);

        info!(
            program = %self.program,
            project = %project_name,
            run_id = %run_id,
            resume,
            message_len = message.len(),
            "Spawning agent process"
        );
        debug!("Full command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, program = %self.program, "Failed to spawn agent process");
            e
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Process("failed to capture stderr".to_string()))?;

        let stderr_project = project_name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            warn!(project = %stderr_project, stderr = %trimmed, "Agent stderr");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Error reading agent stderr");
                        break;
                    }
                }
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut line_count = 0u64;
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            line_count += 1;

            match serde_json::from_str::<AgentLine>(trimmed) {
                Ok(AgentLine::Log { message }) => reporter.log(message),
                Ok(AgentLine::Usage { tokens }) => {
                    reporter.step(StepUpdate::new().with_tokens(tokens)).await?
                }
                Ok(AgentLine::Browser { session }) => {
                    reporter
                        .step(StepUpdate::new().with_browser_session(session))
                        .await?
                }
                Ok(AgentLine::Terminal { session }) => {
                    reporter
                        .step(StepUpdate::new().with_terminal_session(session))
                        .await?
                }
                Ok(AgentLine::Reply { content }) => {
                    let tokens = self.tokens.count_tokens(&content);
                    reporter
                        .step(StepUpdate::new().with_tokens(tokens).with_log(content.clone()))
                        .await?;
                    self.projects
                        .record(&project_name, ChatMessage::assistant(content))
                        .await;
                }
                Err(_) => reporter.log(trimmed),
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        info!(
            project = %project_name,
            run_id = %run_id,
            exit_code,
            lines = line_count,
            "Agent process exited"
        );

        if !status.success() {
            return Err(AgentError::Process(format!(
                "{} exited with code {}",
                self.program, exit_code
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for CommandAgent {
    async fn execute(&self, run: AgentRun) -> Result<(), AgentError> {
        self.run_process(run, false).await
    }

    async fn subsequent_execute(&self, run: AgentRun) -> Result<(), AgentError> {
        self.run_process(run, true).await
    }
}
