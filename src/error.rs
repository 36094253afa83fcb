use crate::core::task::TaskId;
use crate::orchestration::pool::WorkerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Adding task {task} would create a dependency cycle")]
    Cycle { task: TaskId },

    #[error("Task {id} is already registered")]
    DuplicateId { id: TaskId },

    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Invalid status transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: String,
        to: String,
    },

    #[error("Task {id} is already assigned to worker {worker}")]
    AlreadyAssigned { id: TaskId, worker: WorkerId },

    #[error("Conflicting completion result for task {id}")]
    Conflict { id: TaskId },

    #[error("Worker not found: {id}")]
    WorkerNotFound { id: WorkerId },

    #[error("Worker pool is full (max: {max})")]
    PoolFull { max: usize },

    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, Error>;
