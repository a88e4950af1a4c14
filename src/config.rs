use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::ack::{
    AckManager, DEFAULT_ESCALATE_SCRIPT, DEFAULT_MAX_PHASES, DEFAULT_PHASE_TIMEOUT,
    DEFAULT_POLL_INTERVAL,
};
use crate::orchestration::detection::{
    CycleDetector, LoopDetector, DEFAULT_MAX_CYCLES, DEFAULT_MAX_ITERATIONS,
};
use crate::orchestration::nudge::{ScriptNudger, TmuxNudger};
use crate::queue::{QueueLayout, TaskQueue};
use crate::{elog_debug, Result};

/// How stuck workers are nudged during ack escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NudgeKind {
    /// Run the escalate script.
    #[default]
    Script,
    /// Type reminders into the worker's tmux pane.
    Tmux,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_iterations: u32,
    pub max_cycles: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    pub phase_timeout_secs: u64,
    pub max_phases: u32,
    pub poll_interval_ms: u64,
    /// Relative paths are resolved against the project directory.
    pub escalate_script: String,
    pub nudge: NudgeKind,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: DEFAULT_PHASE_TIMEOUT.as_secs(),
            max_phases: DEFAULT_MAX_PHASES,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            escalate_script: DEFAULT_ESCALATE_SCRIPT.to_string(),
            nudge: NudgeKind::Script,
        }
    }
}

/// Project configuration, read from `<project>/.ensemble/ensemble.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue base directory, relative to the project directory unless absolute.
    pub queue_dir: String,
    pub lock_timeout_ms: u64,
    pub limits: LimitsConfig,
    pub ack: AckConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_dir: "queue".to_string(),
            lock_timeout_ms: 5000,
            limits: LimitsConfig::default(),
            ack: AckConfig::default(),
        }
    }
}

impl Config {
    pub fn ensemble_dir(project_dir: &Path) -> PathBuf {
        project_dir.join(".ensemble")
    }

    pub fn config_path(project_dir: &Path) -> PathBuf {
        Self::ensemble_dir(project_dir).join("ensemble.toml")
    }

    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        elog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            elog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        elog_debug!(
            "Config loaded: queue_dir={}, max_iterations={}, nudge={:?}",
            config.queue_dir,
            config.limits.max_iterations,
            config.ack.nudge
        );
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let dir = Self::ensemble_dir(project_dir);
        if !dir.exists() {
            elog_debug!("Creating ensemble directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path(project_dir);
        fs::write(&path, toml::to_string_pretty(self)?)?;
        elog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn queue_path(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.queue_dir)
    }

    pub fn escalate_script_path(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.ack.escalate_script)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.ack.phase_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack.poll_interval_ms)
    }

    pub fn task_queue(&self, project_dir: &Path) -> Result<TaskQueue> {
        Ok(TaskQueue::new(self.queue_path(project_dir))?.with_lock_timeout(self.lock_timeout()))
    }

    /// An ack manager over `<queue>/ack` using the configured nudge kind.
    pub fn ack_manager(&self, project_dir: &Path) -> Result<AckManager> {
        let ack_dir = QueueLayout::new(self.queue_path(project_dir)).ack_dir();
        let manager = AckManager::new(ack_dir)?.with_poll_interval(self.poll_interval());
        Ok(match self.ack.nudge {
            NudgeKind::Script => {
                manager.with_nudger(ScriptNudger::new(self.escalate_script_path(project_dir)))
            }
            NudgeKind::Tmux => manager.with_nudger(TmuxNudger::new()),
        })
    }

    pub fn loop_detector(&self) -> LoopDetector {
        LoopDetector::new(self.limits.max_iterations)
    }

    pub fn cycle_detector(&self) -> CycleDetector {
        CycleDetector::new(self.limits.max_cycles)
    }
}

fn resolve(project_dir: &Path, path: &str) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        expanded
    } else {
        project_dir.join(expanded)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
