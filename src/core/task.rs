//! Task and report records as they are stored in the queue directories.
//!
//! A task is written once into `tasks/`, moved (never edited) into
//! `processing/`, and finally replaced by a report in `reports/`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form parameters attached to a task.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Generate a task id of the form `{timestamp}-{random8}`.
///
/// The timestamp is local time down to milliseconds, so ids sort roughly in
/// creation order; the random suffix keeps ids unique across processes.
pub fn generate_task_id() -> String {
    let timestamp = Local::now().format("%Y%m%d%H%M%S%3f");
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", timestamp, &random[..8])
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in `tasks/`.
    #[default]
    Pending,
    /// Held by exactly one consumer in `processing/`.
    Processing,
    /// A report exists in `reports/`.
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Outcome recorded in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    Success,
    Error,
}

impl std::fmt::Display for TaskResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskResult::Success => write!(f, "success"),
            TaskResult::Error => write!(f, "error"),
        }
    }
}

/// A unit of work in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, also the file stem on disk.
    pub task_id: String,
    /// Opaque instruction for the consumer.
    pub command: String,
    /// Consumer role this task is meant for.
    pub agent: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub status: TaskStatus,
    /// Tasks that must complete before this one is ready.
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with a freshly generated id.
    pub fn new(command: &str, agent: &str) -> Self {
        Self::with_id(&generate_task_id(), command, agent)
    }

    /// Create a pending task with a caller-supplied id.
    pub fn with_id(task_id: &str, command: &str, agent: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            command: command.to_string(),
            agent: agent.to_string(),
            params: Params::new(),
            status: TaskStatus::Pending,
            blocked_by: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn blocked_by<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_by = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether every blocker is in `completed`.
    pub fn is_unblocked_by<F>(&self, is_completed: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        self.blocked_by.iter().all(|id| is_completed(id))
    }
}

/// The immutable record of a finished task.
///
/// Task fields are optional because a report may be written for a task whose
/// processing copy is gone (for example after a consumer crash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blocked_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub result: TaskResult,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl Report {
    /// Build a report, merging in whatever is known about the original task.
    pub fn new(
        task_id: &str,
        task: Option<Task>,
        result: TaskResult,
        output: &str,
        error: Option<&str>,
    ) -> Self {
        let (command, agent, params, blocked_by, created_at) = match task {
            Some(t) => (
                Some(t.command),
                Some(t.agent),
                t.params,
                t.blocked_by,
                Some(t.created_at),
            ),
            None => (None, None, Params::new(), BTreeSet::new(), None),
        };

        Self {
            task_id: task_id.to_string(),
            command,
            agent,
            params,
            blocked_by,
            created_at,
            status: TaskStatus::Completed,
            result,
            output: output.to_string(),
            error: error.map(str::to_string),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }
}
