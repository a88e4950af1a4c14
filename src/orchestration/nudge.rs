//! Nudge actions used by ack escalation.
//!
//! A nudge pokes a worker that has not acknowledged its task. The
//! escalation loop only cares whether the nudge went out, so every
//! implementation reports a [`NudgeOutcome`] and never fails the caller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::tmux::Tmux;
use crate::{elog_debug, elog_warn};

/// The worker a nudge is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NudgeTarget {
    pub worker_id: u32,
    /// tmux pane (or session) the worker runs in, e.g. `%3`.
    pub pane_id: String,
}

impl NudgeTarget {
    pub fn new(worker_id: u32, pane_id: impl Into<String>) -> Self {
        Self {
            worker_id,
            pane_id: pane_id.into(),
        }
    }
}

impl fmt::Display for NudgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} ({})", self.worker_id, self.pane_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NudgeOutcome {
    Sent,
    Failed { reason: String },
}

impl NudgeOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        NudgeOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, NudgeOutcome::Sent)
    }
}

/// Something that can poke a worker during escalation phase `phase` (1-based).
pub trait Nudger: Send + Sync {
    fn nudge(&self, target: &NudgeTarget, phase: u32) -> NudgeOutcome;
}

impl<F> Nudger for F
where
    F: Fn(&NudgeTarget, u32) -> NudgeOutcome + Send + Sync,
{
    fn nudge(&self, target: &NudgeTarget, phase: u32) -> NudgeOutcome {
        self(target, phase)
    }
}

/// Runs `<script> <pane_id> <worker_id> <phase>`.
#[derive(Debug, Clone)]
pub struct ScriptNudger {
    script: PathBuf,
    interpreter: Option<String>,
}

impl ScriptNudger {
    pub fn new(script: impl AsRef<Path>) -> Self {
        Self {
            script: script.as_ref().to_path_buf(),
            interpreter: None,
        }
    }

    /// Run the script through `interpreter` (e.g. `sh`) instead of executing
    /// it directly. Useful when the script has no execute bit.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

impl Nudger for ScriptNudger {
    fn nudge(&self, target: &NudgeTarget, phase: u32) -> NudgeOutcome {
        if !self.script.is_file() {
            elog_warn!("Escalate script not found at {}", self.script.display());
            return NudgeOutcome::failed(format!(
                "escalate script not found at {}",
                self.script.display()
            ));
        }

        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.script);
                cmd
            }
            None => Command::new(&self.script),
        };
        cmd.arg(&target.pane_id)
            .arg(target.worker_id.to_string())
            .arg(phase.to_string());

        elog_debug!(
            "ScriptNudger running {} for {} phase={}",
            self.script.display(),
            target,
            phase
        );
        match cmd.output() {
            Ok(output) if output.status.success() => NudgeOutcome::Sent,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                elog_warn!(
                    "Escalate script failed for phase {}: {} {}",
                    phase,
                    output.status,
                    stderr.trim()
                );
                NudgeOutcome::failed(format!("{}: {}", output.status, stderr.trim()))
            }
            Err(e) => {
                elog_warn!("Cannot run escalate script {}: {}", self.script.display(), e);
                NudgeOutcome::failed(e.to_string())
            }
        }
    }
}

/// Types a reminder straight into the worker's pane.
///
/// Phase 1 sends a reminder. Phase 2 presses Escape first to get out of any
/// pending prompt. Phase 3 and later clear the input line and send an urgent
/// reminder.
#[derive(Debug, Clone, Copy, Default)]
pub struct TmuxNudger;

impl TmuxNudger {
    pub fn new() -> Self {
        Self
    }
}

/// The text typed into the pane for a given phase.
pub fn reminder_message(target: &NudgeTarget, phase: u32) -> String {
    match phase {
        0 | 1 => format!(
            "[ensemble] Worker {}: a task is waiting for you. Check the queue and acknowledge it.",
            target.worker_id
        ),
        2 => format!(
            "[ensemble] Worker {}: reminder, your task is still unacknowledged. Check the queue now.",
            target.worker_id
        ),
        _ => format!(
            "[ensemble] URGENT worker {}: stop current work, check the queue and acknowledge your task immediately.",
            target.worker_id
        ),
    }
}

impl Nudger for TmuxNudger {
    fn nudge(&self, target: &NudgeTarget, phase: u32) -> NudgeOutcome {
        let pane = target.pane_id.as_str();
        if !Tmux::is_available() {
            return NudgeOutcome::failed("tmux is not available");
        }
        if !Tmux::pane_exists(pane) {
            return NudgeOutcome::failed(format!("tmux pane {} not found", pane));
        }
        let message = reminder_message(target, phase);
        let result = match phase {
            0 | 1 => Tmux::send_line(pane, &message),
            2 => Tmux::send_keys(pane, &["Escape"]).and_then(|_| Tmux::send_line(pane, &message)),
            _ => Tmux::send_keys(pane, &["C-u"]).and_then(|_| Tmux::send_line(pane, &message)),
        };
        match result {
            Ok(()) => NudgeOutcome::Sent,
            Err(e) => NudgeOutcome::failed(e.to_string()),
        }
    }
}
