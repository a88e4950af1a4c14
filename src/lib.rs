//! Filesystem-coordinated task orchestration.
//!
//! Independent worker processes share a queue directory. Work is published
//! with atomic renames, claimed with an exclusive rename into
//! `processing/`, and reported back as a YAML file in `reports/`. No
//! coordinator process or lock server is involved.

pub mod atomic;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod queue;
pub mod tmux;

pub use atomic::{atomic_claim, atomic_create, atomic_write, atomic_write_with_lock, CreateOutcome};
pub use config::Config;
pub use crate::core::{DependencyResolver, Report, Task, TaskResult, TaskStatus};
pub use error::{CircularDependencyError, Error, LoopDetectedError, Result};
pub use orchestration::{
    AckManager, CycleDetector, EventKind, EventLog, LoopDetector, NudgeOutcome, NudgeTarget,
    Nudger,
};
pub use queue::{QueueLayout, TaskQueue};
