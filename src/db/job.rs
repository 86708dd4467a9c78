use chrono::Utc;
use log::info;
use rusqlite::{params, OptionalExtension};

use crate::db::Ledger;
use crate::pipeline::result::JobResult;
use crate::pipeline::state::JobState;
use crate::request::job::JobRequest;

/// A job row as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub state: String,
    pub status: Option<String>,
    /// JSON array
    pub outputs: Option<String>,
    /// JSON array
    pub failed_files: Option<String>,
    pub error: Option<String>,
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

impl Ledger {
    /// Add a job in the initialized state, replacing any earlier run with the same id
    pub fn insert_job(&self, id: &str, request: &JobRequest) -> rusqlite::Result<()> {
        info!("Adding job {id} to db");
        let manifest = to_json(request)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO job (id, manifest, state, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, manifest, JobState::Initialized.as_str(), now],
        )?;
        self.conn.execute("DELETE FROM transition WHERE job_id = ?1", [id])?;
        self.record_transition(id, JobState::Initialized, &now)
    }

    pub fn update_state(&self, id: &str, state: JobState) -> rusqlite::Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE job SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.as_str(), now, id],
        )?;
        self.record_transition(id, state, &now)
    }

    /// Store the terminal result of a job that reached publishing
    pub fn finish(&self, id: &str, result: &JobResult) -> rusqlite::Result<()> {
        let state = result.terminal_state();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE job SET state = ?1, status = ?2, outputs = ?3, failed_files = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                state.as_str(),
                result.status.as_str(),
                to_json(&result.outputs)?,
                to_json(&result.failed_files)?,
                now,
                id
            ],
        )?;
        self.record_transition(id, state, &now)
    }

    /// Mark a job failed; `reached` is the last state it completed
    pub fn fail(&self, id: &str, reached: JobState, error: &str) -> rusqlite::Result<()> {
        let now = Utc::now().to_rfc3339();
        let message = format!("failed after {reached}: {error}");
        self.conn.execute(
            "UPDATE job SET state = ?1, status = 'failure', error = ?2, updated_at = ?3 WHERE id = ?4",
            params![JobState::Failed.as_str(), message, now, id],
        )?;
        self.record_transition(id, JobState::Failed, &now)
    }

    pub fn job(&self, id: &str) -> rusqlite::Result<Option<JobRecord>> {
        self.conn
            .query_row(
                "SELECT state, status, outputs, failed_files, error FROM job WHERE id = ?1",
                [id],
                |row| {
                    Ok(JobRecord {
                        state: row.get(0)?,
                        status: row.get(1)?,
                        outputs: row.get(2)?,
                        failed_files: row.get(3)?,
                        error: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    /// States a job went through, oldest first
    pub fn transitions(&self, id: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT state FROM transition WHERE job_id = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map([id], |row| row.get(0))?;
        rows.collect()
    }

    fn record_transition(&self, id: &str, state: JobState, at: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO transition (job_id, state, entered_at) VALUES (?1, ?2, ?3)",
            params![id, state.as_str(), at],
        )?;
        Ok(())
    }
}
