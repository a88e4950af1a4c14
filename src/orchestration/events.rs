//! Per-session NDJSON event log.
//!
//! Every line of `<dir>/<session_id>.ndjson` is one JSON object:
//!
//! ```text
//! {"timestamp":"2026-01-01T12:00:00Z","session_id":"session-20260101-120000","type":"task_start","data":{...}}
//! ```
//!
//! Several processes may append to the same log. Each append holds an
//! exclusive `flock` on the file for the duration of the write so lines never
//! interleave.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{elog_debug, elog_trace, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    TaskStart,
    TaskComplete,
    TaskFailed,
    Escalation,
    LoopDetected,
    WorkerAssign,
    WorkerRelease,
    ReviewStart,
    ReviewResult,
    DispatchInstruction,
}

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
}

/// Aggregate counts over a session's events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_events: usize,
    /// Distinct task ids with a `task_complete` event.
    pub task_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub escalation_count: usize,
    pub loops_detected: usize,
    /// Seconds between the first and the last event.
    pub duration_seconds: f64,
}

/// Session id of the form `session-YYYYmmdd-HHMMSS`.
pub fn generate_session_id() -> String {
    format!("session-{}", Local::now().format("%Y%m%d-%H%M%S"))
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    session_id: String,
}

impl EventLog {
    /// Open (or create) the log for `session_id` under `dir` and record
    /// `session_start`.
    pub fn open(dir: impl AsRef<Path>, session_id: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let log = Self {
            path: dir.join(format!("{}.ndjson", session_id)),
            session_id: session_id.to_string(),
        };
        elog_debug!("EventLog::open {}", log.path.display());
        log.log_event(EventKind::SessionStart, json!({ "session_id": session_id }))?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append one event.
    pub fn log_event(&self, kind: EventKind, data: Value) -> Result<()> {
        let event = Event {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            kind,
            data: if data.is_null() { json!({}) } else { data },
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let written = write_line(&mut file, &line);
        let unlocked = FileExt::unlock(&file);
        written?;
        unlocked?;

        elog_trace!("EventLog {} {:?}", self.session_id, kind);
        Ok(())
    }

    pub fn log_task_start(&self, task_id: &str, worker_id: u32, files: &[String]) -> Result<()> {
        self.log_event(
            EventKind::TaskStart,
            json!({ "task_id": task_id, "worker_id": worker_id, "files": files }),
        )
    }

    /// `status` is free-form; `success` counts as a success and `failed` or
    /// `error` as a failure in [`summary`](Self::summary).
    pub fn log_task_complete(
        &self,
        task_id: &str,
        worker_id: u32,
        status: &str,
        duration_seconds: Option<f64>,
    ) -> Result<()> {
        self.log_event(
            EventKind::TaskComplete,
            json!({
                "task_id": task_id,
                "worker_id": worker_id,
                "status": status,
                "duration_seconds": duration_seconds,
            }),
        )
    }

    pub fn log_task_failed(&self, task_id: &str, worker_id: u32, error: &str) -> Result<()> {
        self.log_event(
            EventKind::TaskFailed,
            json!({ "task_id": task_id, "worker_id": worker_id, "error": error }),
        )
    }

    pub fn log_escalation(&self, worker_id: u32, phase: u32, reason: &str) -> Result<()> {
        self.log_event(
            EventKind::Escalation,
            json!({ "worker_id": worker_id, "phase": phase, "reason": reason }),
        )
    }

    pub fn log_loop_detected(&self, task_id: &str, iteration_count: u32, max_iterations: u32) -> Result<()> {
        self.log_event(
            EventKind::LoopDetected,
            json!({
                "task_id": task_id,
                "iteration_count": iteration_count,
                "max_iterations": max_iterations,
            }),
        )
    }

    pub fn log_review_result(
        &self,
        task_id: &str,
        reviewer: &str,
        result: &str,
        findings_count: u32,
    ) -> Result<()> {
        self.log_event(
            EventKind::ReviewResult,
            json!({
                "task_id": task_id,
                "reviewer": reviewer,
                "result": result,
                "findings_count": findings_count,
            }),
        )
    }

    /// Read back events, optionally only those of one kind.
    ///
    /// Blank lines and lines that do not parse (a foreign tool, a torn write
    /// from a crashed process) are skipped.
    pub fn read_events(&self, filter: Option<EventKind>) -> Result<Vec<Event>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<Event>(line) else {
                continue;
            };
            if filter.map_or(true, |kind| event.kind == kind) {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub fn summary(&self) -> Result<SessionSummary> {
        let events = self.read_events(None)?;
        let mut summary = SessionSummary {
            session_id: self.session_id.clone(),
            total_events: events.len(),
            ..Default::default()
        };

        let mut task_ids = HashSet::new();
        for event in &events {
            match event.kind {
                EventKind::TaskComplete => {
                    if let Some(id) = event.data.get("task_id").and_then(Value::as_str) {
                        task_ids.insert(id.to_string());
                    }
                    match event.data.get("status").and_then(Value::as_str) {
                        Some("success") => summary.success_count += 1,
                        Some("failed") | Some("error") => summary.failed_count += 1,
                        _ => {}
                    }
                }
                EventKind::TaskFailed => summary.failed_count += 1,
                EventKind::Escalation => summary.escalation_count += 1,
                EventKind::LoopDetected => summary.loops_detected += 1,
                _ => {}
            }
        }
        summary.task_count = task_ids.len();

        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            summary.duration_seconds =
                (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        }
        Ok(summary)
    }

    /// Record `session_end` carrying the final summary.
    pub fn close(&self) -> Result<SessionSummary> {
        let summary = self.summary()?;
        self.log_event(EventKind::SessionEnd, serde_json::to_value(&summary)?)?;
        Ok(summary)
    }
}

fn write_line(file: &mut File, line: &str) -> io::Result<()> {
    file.write_all(line.as_bytes())?;
    file.flush()
}
