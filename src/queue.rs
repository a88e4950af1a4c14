//! File-based task queue.
//!
//! ```text
//! queue/
//!   tasks/        pending tasks, one `{task_id}.yaml` each
//!   processing/   claimed tasks, held by exactly one consumer
//!   reports/      completion reports
//!   ack/          receipt markers (see `orchestration::ack`)
//! ```
//!
//! A task moves `tasks/ -> processing/` by rename, which is what makes a claim
//! exclusive across processes. Completion writes a report and drops the
//! processing copy. There is no way back to `tasks/`; a task stuck in
//! `processing/` needs outside intervention.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::atomic::{
    atomic_claim, atomic_create, atomic_write_with_lock, CreateOutcome, DEFAULT_LOCK_TIMEOUT,
};
use crate::core::task::{Params, Report, Task, TaskResult, TaskStatus};
use crate::{elog, elog_debug, elog_error, elog_warn, Error, Result};

/// Extension of task and report files.
pub const TASK_FILE_EXT: &str = "yaml";

/// The directory layout under a queue base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLayout {
    base: PathBuf,
}

impl QueueLayout {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.base.join("tasks")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.base.join("processing")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.base.join("reports")
    }

    pub fn ack_dir(&self) -> PathBuf {
        self.base.join("ack")
    }
}

/// Enqueue/claim/complete over the queue directories.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    layout: QueueLayout,
    lock_timeout: Duration,
}

impl TaskQueue {
    /// Open a queue rooted at `base_dir`, creating the directories if needed.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let layout = QueueLayout::new(base_dir);
        for dir in [
            layout.tasks_dir(),
            layout.processing_dir(),
            layout.reports_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        elog_debug!("TaskQueue::new base={}", layout.base().display());
        Ok(Self {
            layout,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Set how long `enqueue` waits for a contended task file lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    /// Add a task with no dependencies. Returns the generated task id.
    pub fn enqueue(&self, command: &str, agent: &str, params: Params) -> Result<String> {
        self.enqueue_task(Task::new(command, agent).with_params(params))
    }

    /// Add a task that must wait for `blocked_by` to complete.
    pub fn enqueue_with_dependency<I, S>(
        &self,
        command: &str,
        agent: &str,
        params: Params,
        blocked_by: I,
    ) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enqueue_task(
            Task::new(command, agent)
                .with_params(params)
                .blocked_by(blocked_by),
        )
    }

    /// Publish a fully built task (for example one with a caller-supplied id).
    pub fn enqueue_task(&self, mut task: Task) -> Result<String> {
        validate_task_id(&task.task_id)?;
        task.status = TaskStatus::Pending;

        let path = task_path(&self.layout.tasks_dir(), &task.task_id);
        let content = serde_yaml::to_string(&task)?;
        if !atomic_write_with_lock(&path, &content, self.lock_timeout) {
            elog_error!("TaskQueue::enqueue failed to publish {}", path.display());
            return Err(Error::WriteFailed(path));
        }

        elog!(
            "Enqueued task {} agent={} blocked_by={}",
            task.task_id,
            task.agent,
            task.blocked_by.len()
        );
        Ok(task.task_id)
    }

    /// Claim the oldest pending task.
    ///
    /// Candidates are tried in file-name order, which embeds the creation
    /// time, so this is best-effort FIFO. A candidate that another process
    /// claims first is skipped in favour of the next one. Returns `None` when
    /// the queue is empty or every candidate was lost.
    pub fn claim(&self) -> Option<Task> {
        let candidates = match task_files(&self.layout.tasks_dir()) {
            Ok(files) => files,
            Err(e) => {
                elog_warn!("TaskQueue::claim cannot list pending tasks: {}", e);
                return None;
            }
        };

        let processing_dir = self.layout.processing_dir();
        for candidate in candidates {
            let Some(claimed) = atomic_claim(&candidate, &processing_dir) else {
                continue;
            };
            match read_task(&claimed) {
                Ok(mut task) => {
                    task.status = TaskStatus::Processing;
                    elog!("Claimed task {}", task.task_id);
                    return Some(task);
                }
                Err(e) => {
                    elog_error!(
                        "TaskQueue::claim claimed unreadable task {}: {}",
                        claimed.display(),
                        e
                    );
                }
            }
        }

        None
    }

    /// Record the outcome of a task.
    ///
    /// Fields of the original task are taken from its processing copy when
    /// it is still there. A missing processing copy is not an error: a
    /// consumer that crashed after doing its work must still be able to
    /// report.
    ///
    /// Reports are written once. If the task already has one, that report is
    /// returned unchanged and the new outcome is discarded.
    pub fn complete(
        &self,
        task_id: &str,
        result: TaskResult,
        output: &str,
        error: Option<&str>,
    ) -> Result<Report> {
        validate_task_id(task_id)?;
        let processing_path = task_path(&self.layout.processing_dir(), task_id);
        let report_path = task_path(&self.layout.reports_dir(), task_id);

        if let Some(existing) = self.read_report(task_id)? {
            elog_warn!(
                "TaskQueue::complete {} already reported, keeping result={}",
                task_id,
                existing.result
            );
            remove_processing_copy(&processing_path);
            return Ok(existing);
        }

        let original = if processing_path.exists() {
            match read_task(&processing_path) {
                Ok(task) => Some(task),
                Err(e) => {
                    elog_warn!(
                        "TaskQueue::complete cannot read {}: {}",
                        processing_path.display(),
                        e
                    );
                    None
                }
            }
        } else {
            elog_debug!("TaskQueue::complete {} has no processing copy", task_id);
            None
        };

        let report = Report::new(task_id, original, result, output, error);
        let report = match atomic_create(&report_path, &serde_yaml::to_string(&report)?) {
            CreateOutcome::Created => report,
            CreateOutcome::Exists => {
                // Lost a race with another completer; theirs stands.
                elog_warn!("TaskQueue::complete {} reported concurrently", task_id);
                match self.read_report(task_id)? {
                    Some(existing) => existing,
                    None => return Err(Error::WriteFailed(report_path)),
                }
            }
            CreateOutcome::Failed => {
                elog_error!("TaskQueue::complete failed to publish {}", report_path.display());
                return Err(Error::WriteFailed(report_path));
            }
        };

        remove_processing_copy(&processing_path);
        elog!("Completed task {} result={}", task_id, report.result);
        Ok(report)
    }

    /// Ids of pending tasks, oldest first.
    pub fn list_pending(&self) -> Result<Vec<String>> {
        list_ids(&self.layout.tasks_dir())
    }

    /// Ids of claimed, unfinished tasks.
    pub fn list_processing(&self) -> Result<Vec<String>> {
        list_ids(&self.layout.processing_dir())
    }

    /// Ids of tasks with a report.
    pub fn list_reports(&self) -> Result<Vec<String>> {
        list_ids(&self.layout.reports_dir())
    }

    /// All readable pending tasks, oldest first. Unreadable files are skipped.
    pub fn pending_tasks(&self) -> Result<Vec<Task>> {
        let tasks = task_files(&self.layout.tasks_dir())?
            .into_iter()
            .filter_map(|path| match read_task(&path) {
                Ok(task) => Some(task),
                // Claimed by someone else between listing and reading.
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => {
                    elog_warn!("Skipping unreadable task {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        Ok(tasks)
    }

    /// Pending tasks whose `blocked_by` set is contained in `completed`.
    ///
    /// A stateless counterpart of `DependencyResolver::get_ready_tasks` for
    /// consumers that do not keep the graph in memory.
    pub fn get_ready_tasks(&self, completed: &HashSet<String>) -> Result<Vec<Task>> {
        Ok(self
            .pending_tasks()?
            .into_iter()
            .filter(|task| task.is_unblocked_by(|id| completed.contains(id)))
            .collect())
    }

    /// Read the report for a task, if one exists.
    pub fn read_report(&self, task_id: &str) -> Result<Option<Report>> {
        validate_task_id(task_id)?;
        let path = task_path(&self.layout.reports_dir(), task_id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_yaml::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every file in the pending, processing and report directories.
    ///
    /// Meant for session reset only; running consumers lose their tasks.
    pub fn cleanup(&self) -> Result<()> {
        for dir in [
            self.layout.tasks_dir(),
            self.layout.processing_dir(),
            self.layout.reports_dir(),
        ] {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_file() {
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != io::ErrorKind::NotFound {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
        elog!("Queue cleaned up at {}", self.layout.base().display());
        Ok(())
    }
}

/// Reject ids that would escape the queue directory or hide as dotfiles.
///
/// `:` is reserved as the separator in cycle-detector transition keys.
pub fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.is_empty()
        || task_id.starts_with('.')
        || task_id.contains(['/', '\\', ':'])
        || task_id.contains('\0')
    {
        return Err(Error::Validation(format!("Invalid task id: {:?}", task_id)));
    }
    Ok(())
}

fn task_path(dir: &Path, task_id: &str) -> PathBuf {
    dir.join(format!("{}.{}", task_id, TASK_FILE_EXT))
}

fn remove_processing_copy(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            elog_warn!("TaskQueue::complete cannot remove {}: {}", path.display(), e);
        }
    }
}

fn read_task(path: &Path) -> Result<Task> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Task files in `dir`, sorted by name. Lock and temp files are ignored.
fn task_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some(TASK_FILE_EXT)
                && path.is_file()
        })
        .collect();
    files.sort();
    Ok(files)
}

fn list_ids(dir: &Path) -> Result<Vec<String>> {
    Ok(task_files(dir)?
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .collect())
}
