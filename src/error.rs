use std::path::PathBuf;

use thiserror::Error;

/// A directed cycle in the `blocked_by` graph.
///
/// The cycle is reported as an ordered list of task ids whose first and
/// last entries are the same task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circular dependency detected: {}", .cycle.join(" -> "))]
pub struct CircularDependencyError {
    pub cycle: Vec<String>,
}

/// A task or a state transition was executed more often than allowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{key} exceeded max iterations ({count}/{max})")]
pub struct LoopDetectedError {
    /// The task id, or the transition key `{task_id}:{from}->{to}`.
    pub key: String,
    pub count: u32,
    pub max: u32,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to publish {0}")]
    WriteFailed(PathBuf),

    #[error(transparent)]
    CircularDependency(#[from] CircularDependencyError),

    #[error(transparent)]
    LoopDetected(#[from] LoopDetectedError),
}

pub type Result<T> = std::result::Result<T, Error>;
