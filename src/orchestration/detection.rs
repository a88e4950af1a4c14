//! Runaway-execution guards.
//!
//! `LoopDetector` bounds how often the same task is re-run and
//! `CycleDetector` bounds how often a task goes through the same state
//! transition (for example `review -> fix`). Both are plain counters owned by
//! the orchestrator.
//!
//! ## Example
//!
//! ```
//! use ensemble::orchestration::LoopDetector;
//!
//! let mut detector = LoopDetector::new(2);
//! assert!(!detector.record("task-1"));
//! assert!(!detector.record("task-1"));
//! assert!(detector.record("task-1"));
//! assert_eq!(detector.get_count("task-1"), 3);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LoopDetectedError;
use crate::{elog_debug, elog_warn};

/// Default number of runs allowed per task.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Default number of repeats allowed per state transition.
pub const DEFAULT_MAX_CYCLES: u32 = 3;

/// Counts executions per task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopDetector {
    max_iterations: u32,
    #[serde(default)]
    counts: HashMap<String, u32>,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl LoopDetector {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            counts: HashMap::new(),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Record one execution of `task_id`.
    ///
    /// Returns true once the count exceeds the threshold. Counting continues
    /// past the threshold.
    pub fn record(&mut self, task_id: &str) -> bool {
        let count = self.counts.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        let looped = *count > self.max_iterations;
        if looped {
            elog_warn!(
                "Loop detected for {} ({}/{})",
                task_id,
                count,
                self.max_iterations
            );
        } else {
            elog_debug!("LoopDetector::record {} count={}", task_id, count);
        }
        looped
    }

    /// Executions recorded for `task_id`, 0 if never seen.
    pub fn get_count(&self, task_id: &str) -> u32 {
        self.counts.get(task_id).copied().unwrap_or(0)
    }

    /// Forget one task, or every task when `task_id` is `None`.
    pub fn reset(&mut self, task_id: Option<&str>) {
        match task_id {
            Some(id) => {
                self.counts.remove(id);
            }
            None => self.counts.clear(),
        }
    }

    /// Like [`record`](Self::record) but reports a loop as an error.
    pub fn check_loop(&mut self, task_id: &str) -> Result<(), LoopDetectedError> {
        if self.record(task_id) {
            return Err(LoopDetectedError {
                key: task_id.to_string(),
                count: self.get_count(task_id),
                max: self.max_iterations,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Counts state transitions per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDetector {
    max_cycles: u32,
    #[serde(default)]
    counts: HashMap<String, u32>,
}

impl Default for CycleDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CYCLES)
    }
}

fn transition_key(task_id: &str, from_state: &str, to_state: &str) -> String {
    format!("{}:{}->{}", task_id, from_state, to_state)
}

/// Task part of a [`transition_key`]: everything before the `:` that
/// precedes the last `->`.
fn transition_task(key: &str) -> Option<&str> {
    let (head, _to) = key.rsplit_once("->")?;
    head.rsplit_once(':').map(|(task, _from)| task)
}

impl CycleDetector {
    pub fn new(max_cycles: u32) -> Self {
        Self {
            max_cycles,
            counts: HashMap::new(),
        }
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Record one `from_state -> to_state` transition of `task_id`.
    ///
    /// Returns true once that transition has happened more than `max_cycles`
    /// times.
    pub fn record_cycle(&mut self, task_id: &str, from_state: &str, to_state: &str) -> bool {
        let key = transition_key(task_id, from_state, to_state);
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        let exceeded = *count > self.max_cycles;
        if exceeded {
            elog_warn!("Cycle detected for {} ({}/{})", key, count, self.max_cycles);
        } else {
            elog_debug!("CycleDetector::record_cycle {} count={}", key, count);
        }
        exceeded
    }

    pub fn get_cycle_count(&self, task_id: &str, from_state: &str, to_state: &str) -> u32 {
        self.counts
            .get(&transition_key(task_id, from_state, to_state))
            .copied()
            .unwrap_or(0)
    }

    /// Forget every transition of one task, or everything when `None`.
    ///
    /// Keys are matched on their whole task part, so resetting `t1` leaves
    /// `t10` and `t1:x` alone.
    pub fn reset(&mut self, task_id: Option<&str>) {
        match task_id {
            Some(id) => {
                self.counts.retain(|key, _| transition_task(key) != Some(id));
            }
            None => self.counts.clear(),
        }
    }

    /// Record a `review -> fix` transition and fail once it repeats too often.
    pub fn check_review_cycle(&mut self, task_id: &str) -> Result<(), LoopDetectedError> {
        self.check_transition(task_id, "review", "fix")
    }

    /// Record a transition and fail once it repeats too often.
    pub fn check_transition(
        &mut self,
        task_id: &str,
        from_state: &str,
        to_state: &str,
    ) -> Result<(), LoopDetectedError> {
        if self.record_cycle(task_id, from_state, to_state) {
            return Err(LoopDetectedError {
                key: transition_key(task_id, from_state, to_state),
                count: self.get_cycle_count(task_id, from_state, to_state),
                max: self.max_cycles,
            });
        }
        Ok(())
    }
}
