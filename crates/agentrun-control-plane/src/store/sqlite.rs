//! SQLite-backed state store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use agentrun_core::{ProjectName, ProjectState, RunError, RunId};

use super::{StateStore, StoreError};

const SELECT_COLUMNS: &str = "SELECT project_name, run_id, agent_is_active, completed, \
     browser_session, terminal_session, token_usage, last_updated, error \
     FROM project_states";

/// Durable state store keeping one row per project in SQLite.
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(unavailable)?;
            }
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA busy_timeout=5000;",
        )
        .map_err(unavailable)?;
        info!(path = %path.display(), "Opened SQLite state store");
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS project_states (\
                project_name TEXT PRIMARY KEY,\
                run_id INTEGER NOT NULL,\
                agent_is_active INTEGER NOT NULL,\
                completed INTEGER NOT NULL,\
                browser_session TEXT,\
                terminal_session TEXT,\
                token_usage INTEGER NOT NULL DEFAULT 0,\
                last_updated TEXT NOT NULL,\
                error TEXT\
             );",
        )
        .map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            // A panic while holding the lock leaves the connection usable.
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, project: &ProjectName) -> Result<Option<ProjectState>, StoreError> {
        let name = project.as_str().to_string();
        self.blocking(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE project_name = ?1"),
                    params![name],
                    RawRow::from_row,
                )
                .optional()
                .map_err(unavailable)?;
            raw.map(RawRow::decode).transpose()
        })
        .await
    }

    async fn put(&self, state: &ProjectState) -> Result<(), StoreError> {
        let encoded = EncodedRow::encode(state)?;
        debug!(project = %state.project_name, run_id = %state.run_id, "Persisting project state");
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO project_states (project_name, run_id, agent_is_active, completed, \
                 browser_session, terminal_session, token_usage, last_updated, error) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(project_name) DO UPDATE SET \
                 run_id = excluded.run_id, agent_is_active = excluded.agent_is_active, \
                 completed = excluded.completed, browser_session = excluded.browser_session, \
                 terminal_session = excluded.terminal_session, token_usage = excluded.token_usage, \
                 last_updated = excluded.last_updated, error = excluded.error",
                params![
                    encoded.project_name,
                    encoded.run_id,
                    encoded.agent_is_active,
                    encoded.completed,
                    encoded.browser_session,
                    encoded.terminal_session,
                    encoded.token_usage,
                    encoded.last_updated,
                    encoded.error,
                ],
            )
            .map_err(unavailable)?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ProjectState>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} ORDER BY project_name"))
                .map_err(unavailable)?;
            let rows = stmt
                .query_map([], RawRow::from_row)
                .map_err(unavailable)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(unavailable)?;
            rows.into_iter().map(RawRow::decode).collect()
        })
        .await
    }
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Column values of a row, before domain validation.
struct RawRow {
    project_name: String,
    run_id: i64,
    agent_is_active: bool,
    completed: bool,
    browser_session: Option<String>,
    terminal_session: Option<String>,
    token_usage: i64,
    last_updated: String,
    error: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            project_name: row.get(0)?,
            run_id: row.get(1)?,
            agent_is_active: row.get(2)?,
            completed: row.get(3)?,
            browser_session: row.get(4)?,
            terminal_session: row.get(5)?,
            token_usage: row.get(6)?,
            last_updated: row.get(7)?,
            error: row.get(8)?,
        })
    }

    fn decode(self) -> Result<ProjectState, StoreError> {
        let project = self.project_name.clone();
        let corrupt = |reason: String| StoreError::Corrupt {
            project: project.clone(),
            reason,
        };

        let project_name = ProjectName::new(self.project_name).map_err(|e| corrupt(e.to_string()))?;
        let run_id = u64::try_from(self.run_id).map_err(|e| corrupt(format!("run_id: {e}")))?;
        let token_usage =
            u64::try_from(self.token_usage).map_err(|e| corrupt(format!("token_usage: {e}")))?;
        let last_updated = DateTime::parse_from_rfc3339(&self.last_updated)
            .map_err(|e| corrupt(format!("last_updated: {e}")))?
            .with_timezone(&Utc);
        let browser_session = decode_json(self.browser_session.as_deref())
            .map_err(|e| corrupt(format!("browser_session: {e}")))?;
        let terminal_session = decode_json(self.terminal_session.as_deref())
            .map_err(|e| corrupt(format!("terminal_session: {e}")))?;
        let error: Option<RunError> =
            decode_json(self.error.as_deref()).map_err(|e| corrupt(format!("error: {e}")))?;

        Ok(ProjectState {
            project_name,
            run_id: RunId::new(run_id),
            agent_is_active: self.agent_is_active,
            completed: self.completed,
            browser_session,
            terminal_session,
            token_usage,
            last_updated,
            error,
        })
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(
    text: Option<&str>,
) -> Result<Option<T>, serde_json::Error> {
    text.map(serde_json::from_str).transpose()
}

/// Column values ready to bind.
struct EncodedRow {
    project_name: String,
    run_id: i64,
    agent_is_active: bool,
    completed: bool,
    browser_session: Option<String>,
    terminal_session: Option<String>,
    token_usage: i64,
    last_updated: String,
    error: Option<String>,
}

impl EncodedRow {
    fn encode(state: &ProjectState) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            project: state.project_name.to_string(),
            reason,
        };
        Ok(Self {
            project_name: state.project_name.as_str().to_string(),
            run_id: i64::try_from(state.run_id.get())
                .map_err(|e| corrupt(format!("run_id: {e}")))?,
            agent_is_active: state.agent_is_active,
            completed: state.completed,
            browser_session: state.browser_session.as_ref().map(|v| v.to_string()),
            terminal_session: state.terminal_session.as_ref().map(|v| v.to_string()),
            token_usage: i64::try_from(state.token_usage)
                .map_err(|e| corrupt(format!("token_usage: {e}")))?,
            last_updated: state.last_updated.to_rfc3339(),
            error: state
                .error
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| corrupt(format!("error: {e}")))?,
        })
    }
}
