use crate::resource::ResourceStatus;
use hostflow_cloud::CloudError;
use thiserror::Error;

/// Resource State Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ResourceStatus,
        to: ResourceStatus,
    },

    #[error("Field {field} of {id} is immutable")]
    ImmutableField { id: String, field: &'static str },

    #[error("Outbox entry not found: {0}")]
    TaskNotFound(String),

    #[error("State is locked: {0}")]
    Locked(String),

    #[error("Unsupported state file: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Task Queue errors
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Dead-lettered task not found: {0}")]
    DeadLetterNotFound(String),
}

/// Errors surfaced by the orchestration layer
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Provider(#[from] CloudError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
