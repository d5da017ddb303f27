//! Work Queue: durable FIFO-with-priority of pending step executions.

use async_trait::async_trait;
use flowline_contracts::{JobStatus, QueueJob};
use uuid::Uuid;

use super::error::StoreError;

/// Outcome of `nack`: whether the Retry Controller's decision resulted in a
/// requeue or a terminal dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    Dead,
}

#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// Enqueue a job, skipping silently if an in-flight job already exists
    /// for `(execution_id, node_id)` (queued or leased). Returns the
    /// existing or newly created job.
    async fn enqueue(
        &self,
        execution_id: i64,
        node_id: &str,
        action: serde_json::Value,
        context: serde_json::Value,
        priority: i32,
        max_attempts: i32,
        available_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<QueueJob, StoreError>;

    /// True if a job is currently queued or leased for `(execution_id, node_id)`.
    async fn has_in_flight(&self, execution_id: i64, node_id: &str) -> Result<bool, StoreError>;

    /// Atomically select, lease, and return the single highest-priority
    /// eligible job (`status='queued' AND available_at <= now`), ties
    /// broken by ascending id (FIFO). `None` if none eligible.
    async fn lease(
        &self,
        worker_id: &str,
        lease_seconds: u32,
    ) -> Result<Option<QueueJob>, StoreError>;

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extend_seconds: Option<u32>,
    ) -> Result<(), StoreError>;

    /// Mark a job `done`.
    async fn ack(&self, job_id: Uuid) -> Result<(), StoreError>;

    /// Requeue with the supplied delay, or mark `dead` if `attempts >= max_attempts`.
    async fn nack(
        &self,
        job_id: Uuid,
        retry_delay: Option<chrono::Duration>,
    ) -> Result<NackOutcome, StoreError>;

    /// Reset every expired lease (`lease_until < now`) back to `queued`.
    /// Returns the ids reclaimed.
    async fn reap_expired(&self) -> Result<Vec<Uuid>, StoreError>;

    async fn size_by_status(&self, status: JobStatus) -> Result<i64, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<QueueJob>, StoreError>;
}
