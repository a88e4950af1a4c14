//! Core domain models for the coordination layer.
//!
//! Tasks and reports as they live on disk, and the in-memory dependency
//! graph that decides which pending tasks may run.

pub mod dag;
pub mod task;

pub use dag::DependencyResolver;
pub use task::{generate_task_id, Params, Report, Task, TaskResult, TaskStatus};
