//! Append-only session log.
//!
//! Each dialog turn and each memory summary becomes one JSON object on its
//! own line:
//!
//! ```text
//! {"type":"turn","session":"…","ts":1718000000.5,"user":"…","response":"…","tools":[…]}
//! {"type":"summary","session":"…","ts":1718000001.0,"summary":"…"}
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::tools::ToolResult;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode session record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for turn and summary records.
pub trait SessionLog: Send + Sync {
    fn record_turn(
        &self,
        session_id: &str,
        user_text: &str,
        response_text: &str,
        tool_results: &[ToolResult],
    ) -> Result<(), SessionError>;

    fn record_summary(&self, session_id: &str, summary: &str) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ToolRecord<'a> {
    task_id: &'a str,
    command: &'a str,
    returncode: i32,
    stdout: &'a str,
    stderr: &'a str,
    /// Seconds.
    duration: f64,
    timed_out: bool,
}

impl<'a> From<&'a ToolResult> for ToolRecord<'a> {
    fn from(r: &'a ToolResult) -> Self {
        Self {
            task_id: &r.task_id,
            command: &r.command,
            returncode: r.returncode,
            stdout: &r.stdout,
            stderr: &r.stderr,
            duration: r.duration.as_secs_f64(),
            timed_out: r.timed_out,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SessionRecord<'a> {
    Turn {
        session: &'a str,
        ts: f64,
        user: &'a str,
        response: &'a str,
        tools: Vec<ToolRecord<'a>>,
    },
    Summary {
        session: &'a str,
        ts: f64,
        summary: &'a str,
    },
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// JsonlSessionStore
// ---------------------------------------------------------------------------

/// Appends records to a JSON-lines file, creating parent directories on
/// first write.
pub struct JsonlSessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &SessionRecord<'_>) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl SessionLog for JsonlSessionStore {
    fn record_turn(
        &self,
        session_id: &str,
        user_text: &str,
        response_text: &str,
        tool_results: &[ToolResult],
    ) -> Result<(), SessionError> {
        self.append(&SessionRecord::Turn {
            session: session_id,
            ts: unix_now(),
            user: user_text,
            response: response_text,
            tools: tool_results.iter().map(ToolRecord::from).collect(),
        })
    }

    fn record_summary(&self, session_id: &str, summary: &str) -> Result<(), SessionError> {
        self.append(&SessionRecord::Summary {
            session: session_id,
            ts: unix_now(),
            summary,
        })
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Keeps records in memory as JSON values.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySessionLog {
    pub records: Mutex<Vec<serde_json::Value>>,
}

#[cfg(test)]
impl MemorySessionLog {
    fn push(&self, record: &SessionRecord<'_>) -> Result<(), SessionError> {
        let value = serde_json::to_value(record)?;
        self.records.lock().unwrap().push(value);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<serde_json::Value> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SessionLog for MemorySessionLog {
    fn record_turn(
        &self,
        session_id: &str,
        user_text: &str,
        response_text: &str,
        tool_results: &[ToolResult],
    ) -> Result<(), SessionError> {
        self.push(&SessionRecord::Turn {
            session: session_id,
            ts: unix_now(),
            user: user_text,
            response: response_text,
            tools: tool_results.iter().map(ToolRecord::from).collect(),
        })
    }

    fn record_summary(&self, session_id: &str, summary: &str) -> Result<(), SessionError> {
        self.push(&SessionRecord::Summary {
            session: session_id,
            ts: unix_now(),
            summary,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
