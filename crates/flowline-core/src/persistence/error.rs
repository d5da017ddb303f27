//! Shared error type for the event log and work queue.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(i64),

    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("job {0} is not leased by worker {1}")]
    LeaseMismatch(uuid::Uuid, String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
