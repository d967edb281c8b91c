//! Interview persistence
//!
//! Uses SQLite to keep every finished or abandoned interview for follow-up

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How an interview ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every question was answered
    Complete,
    /// The caller gave up, went silent or could not be understood
    Abandoned,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Complete => "complete",
            Outcome::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(Outcome::Complete),
            "abandoned" => Some(Outcome::Abandoned),
            _ => None,
        }
    }
}

/// Answers collected during one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterviewRecord {
    pub call_sid: String,
    pub answers: Vec<String>,
    pub outcome: Outcome,
}

/// Stored interview row
#[derive(Debug, Clone, Serialize)]
pub struct StoredInterview {
    pub id: i64,
    pub call_sid: String,
    pub recorded_at: String,
    pub outcome: Outcome,
    pub answers: Vec<String>,
}

/// Receives interviews once the call flow is done with them
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn submit(&self, record: &InterviewRecord) -> Result<(), DatabaseError>;
}

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize database tables
    fn init(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS interviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                call_sid TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                answers_json TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Append an interview row
    pub fn insert_interview(&self, record: &InterviewRecord) -> Result<i64, DatabaseError> {
        let answers_json = serde_json::to_string(&record.answers)?;
        let recorded_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO interviews (call_sid, recorded_at, outcome, answers_json)
             VALUES (?, ?, ?, ?)",
            params![
                record.call_sid,
                recorded_at,
                record.outcome.as_str(),
                answers_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent interviews, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredInterview>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, call_sid, recorded_at, outcome, answers_json
             FROM interviews ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut interviews = Vec::new();
        for row in rows {
            let (id, call_sid, recorded_at, outcome, answers_json) = row?;
            interviews.push(StoredInterview {
                id,
                call_sid,
                recorded_at,
                outcome: Outcome::from_str(&outcome).unwrap_or(Outcome::Abandoned),
                answers: serde_json::from_str(&answers_json)?,
            });
        }
        Ok(interviews)
    }
}

#[async_trait]
impl CompletionSink for Database {
    async fn submit(&self, record: &InterviewRecord) -> Result<(), DatabaseError> {
        let id = self.insert_interview(record)?;
        info!(
            "[{}] Stored {} interview #{} ({} answers)",
            record.call_sid,
            record.outcome.as_str(),
            id,
            record.answers.len()
        );
        Ok(())
    }
}
