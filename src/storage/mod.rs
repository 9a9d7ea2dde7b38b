//! Run database: one JSON document per replay run.
//!
//! The database accumulates one [`SessionRecord`] per task as the run
//! progresses and is flushed after every record, so a crash mid-run loses
//! at most the in-flight task. Writes go through a temp file and an atomic
//! rename so readers never observe a partially written document.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compare::DiffComparison;
use crate::error::StorageError;

/// Terminal status of one replayed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::TimedOut => "timed_out",
        }
    }
}

/// Everything recorded about one task's replay.
///
/// Exactly one record exists per task that reached a terminal state,
/// whatever that state was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub task_id: u64,
    pub task_title: String,
    pub task_url: String,
    /// The reverse-engineered prompt given to the agent.
    pub prompt: String,
    /// Agent session id; present once the agent was actually launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: SessionStatus,
    /// Failure or timeout detail, absent for completed sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Aggregated view of the session's normalized events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<crate::session::SessionSummary>,
    /// Agent-vs-human diff comparison, when the workspace diff was captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<DiffComparison>,
    /// Raw unified diff the agent produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_diff: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Top-level run document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_url: String,
    pub run_timestamp: DateTime<Utc>,
    pub days_analyzed: u32,
    pub sessions: Vec<SessionRecord>,
}

impl Database {
    pub fn new(owner: &str, name: &str, url: &str, days_analyzed: u32) -> Self {
        Self {
            repo_owner: owner.to_string(),
            repo_name: name.to_string(),
            repo_url: url.to_string(),
            run_timestamp: Utc::now(),
            days_analyzed,
            sessions: Vec::new(),
        }
    }

    /// Load a database from a JSON document on disk.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the database atomically: serialize to a sibling temp file,
    /// then rename over the destination.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(path);
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn push(&mut self, record: SessionRecord) {
        self.sessions.push(record);
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "db.json".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Persistent store that flushes after every appended record.
pub struct RecordStore {
    path: PathBuf,
    database: Database,
}

impl RecordStore {
    pub fn create(path: PathBuf, database: Database) -> Result<Self, StorageError> {
        database.save(&path)?;
        Ok(Self { path, database })
    }

    /// Append a record and flush immediately.
    pub fn append(&mut self, record: SessionRecord) -> Result<(), StorageError> {
        self.database.push(record);
        self.database.save(&self.path)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
