//! Receipt acknowledgment for dispatched tasks.
//!
//! A worker confirms it has seen a task by creating `ack/{task_id}.ack`.
//! Only the file's existence matters; its content (`"{agent}\n{timestamp}\n"`)
//! is informational. The dispatcher polls for the marker and, when a worker
//! stays silent, escalates through a fixed number of nudge phases.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::atomic::atomic_write;
use crate::orchestration::events::EventLog;
use crate::orchestration::nudge::{NudgeOutcome, NudgeTarget, Nudger, ScriptNudger};
use crate::queue::validate_task_id;
use crate::{elog, elog_debug, elog_warn, Result};

pub const ACK_FILE_EXT: &str = "ack";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_MAX_PHASES: u32 = 3;

pub const DEFAULT_ESCALATE_SCRIPT: &str = "scripts/escalate.sh";

/// Parsed content of an ack marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub agent: String,
    pub timestamp: String,
}

pub struct AckManager {
    ack_dir: PathBuf,
    poll_interval: Duration,
    nudger: Box<dyn Nudger>,
    event_log: Option<Arc<EventLog>>,
}

impl fmt::Debug for AckManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckManager")
            .field("ack_dir", &self.ack_dir)
            .field("poll_interval", &self.poll_interval)
            .field("event_log", &self.event_log.as_ref().map(|l| l.path()))
            .finish_non_exhaustive()
    }
}

impl AckManager {
    /// Create a manager over `ack_dir`, creating the directory if needed.
    ///
    /// Nudges default to running `scripts/escalate.sh`.
    pub fn new(ack_dir: impl AsRef<Path>) -> Result<Self> {
        let ack_dir = ack_dir.as_ref().to_path_buf();
        fs::create_dir_all(&ack_dir)?;
        elog_debug!("AckManager::new ack_dir={}", ack_dir.display());
        Ok(Self {
            ack_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            nudger: Box::new(ScriptNudger::new(DEFAULT_ESCALATE_SCRIPT)),
            event_log: None,
        })
    }

    pub fn with_nudger(mut self, nudger: impl Nudger + 'static) -> Self {
        self.nudger = Box::new(nudger);
        self
    }

    /// Record an `escalation` event for every nudge.
    pub fn with_event_log(mut self, event_log: Arc<EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    /// Poll interval used by [`wait_with_escalation`](Self::wait_with_escalation).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn ack_dir(&self) -> &Path {
        &self.ack_dir
    }

    pub fn ack_path(&self, task_id: &str) -> PathBuf {
        self.ack_dir.join(format!("{}.{}", task_id, ACK_FILE_EXT))
    }

    /// Acknowledge `task_id` on behalf of `agent`. Sending twice is harmless.
    pub fn send(&self, task_id: &str, agent: &str) -> bool {
        if !accepts_id("send", task_id) {
            return false;
        }
        let content = format!("{}\n{}\n", agent, Local::now().to_rfc3339());
        let sent = atomic_write(&self.ack_path(task_id), &content);
        if sent {
            elog!("Ack sent for {} by {}", task_id, agent);
        } else {
            elog_warn!("Failed to write ack for {}", task_id);
        }
        sent
    }

    /// Whether `task_id` has been acknowledged right now.
    ///
    /// An id that could not have been sent is never acknowledged.
    pub fn check(&self, task_id: &str) -> bool {
        accepts_id("check", task_id) && self.ack_path(task_id).exists()
    }

    /// Read the marker for `task_id`, if present.
    pub fn read(&self, task_id: &str) -> Option<AckRecord> {
        if !accepts_id("read", task_id) {
            return None;
        }
        let content = fs::read_to_string(self.ack_path(task_id)).ok()?;
        let mut lines = content.lines();
        Some(AckRecord {
            agent: lines.next().unwrap_or_default().to_string(),
            timestamp: lines.next().unwrap_or_default().to_string(),
        })
    }

    /// Poll for the marker until it appears or `timeout` elapses.
    ///
    /// The marker is checked before every sleep and once more at the
    /// deadline, so a zero timeout still performs one check. A timeout too
    /// large to express as a deadline waits until the marker appears.
    pub fn wait(&self, task_id: &str, timeout: Duration, interval: Duration) -> bool {
        if !accepts_id("wait", task_id) {
            return false;
        }
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.check(task_id) {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    std::thread::sleep(interval.min(deadline - now));
                }
                None => std::thread::sleep(interval),
            }
        }
    }

    /// Async counterpart of [`wait`](Self::wait) for tokio callers.
    pub async fn wait_async(&self, task_id: &str, timeout: Duration, interval: Duration) -> bool {
        if !accepts_id("wait_async", task_id) {
            return false;
        }
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            if self.check(task_id) {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    tokio::time::sleep(interval.min(deadline - now)).await;
                }
                None => tokio::time::sleep(interval).await,
            }
        }
    }

    /// Wait for an ack, nudging the worker between waits.
    ///
    /// Phase 0 is a plain wait of `phase_timeout`. Each following phase
    /// `1..=max_phases` nudges `target` and waits again. Returns whether the
    /// ack arrived and the phase in which it did, or `(false, max_phases)`
    /// once every phase is spent. Nudge failures are logged and the
    /// procedure carries on.
    pub fn wait_with_escalation(
        &self,
        task_id: &str,
        target: &NudgeTarget,
        phase_timeout: Duration,
        max_phases: u32,
    ) -> (bool, u32) {
        if self.wait(task_id, phase_timeout, self.poll_interval) {
            return (true, 0);
        }

        for phase in 1..=max_phases {
            elog_warn!(
                "No ack for {} from {}, escalating (phase {}/{})",
                task_id,
                target,
                phase,
                max_phases
            );
            let outcome = self.nudger.nudge(target, phase);
            self.record_escalation(task_id, target, phase, &outcome);

            if self.wait(task_id, phase_timeout, self.poll_interval) {
                elog!("Ack for {} received after phase {}", task_id, phase);
                return (true, phase);
            }
        }

        elog_warn!(
            "No ack for {} from {} after {} phases",
            task_id,
            target,
            max_phases
        );
        (false, max_phases)
    }

    fn record_escalation(&self, task_id: &str, target: &NudgeTarget, phase: u32, outcome: &NudgeOutcome) {
        let reason = match outcome {
            NudgeOutcome::Sent => format!("no ack for {}", task_id),
            NudgeOutcome::Failed { reason } => {
                elog_warn!("Nudge for {} phase {} failed: {}", target, phase, reason);
                format!("no ack for {}; nudge failed: {}", task_id, reason)
            }
        };
        if let Some(log) = &self.event_log {
            if let Err(e) = log.log_escalation(target.worker_id, phase, &reason) {
                elog_warn!("Cannot record escalation event: {}", e);
            }
        }
    }

    /// Delete every ack marker.
    pub fn cleanup(&self) -> Result<()> {
        for entry in fs::read_dir(&self.ack_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ACK_FILE_EXT) {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        elog_debug!("Ack markers cleaned up in {}", self.ack_dir.display());
        Ok(())
    }
}

fn accepts_id(op: &str, task_id: &str) -> bool {
    match validate_task_id(task_id) {
        Ok(()) => true,
        Err(e) => {
            elog_warn!("AckManager::{} rejected: {}", op, e);
            false
        }
    }
}
