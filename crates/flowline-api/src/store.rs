//! `AnyStore`: the API process's runtime choice between the in-memory
//! dev-mode backend and PostgreSQL, behind a single concrete type so the
//! `Broker`/`EventDispatcher` (generic over one `S: EventLog + WorkQueue`)
//! need not know which backend is live.
//!
//! `flowline-api` decides once, at startup, based on whether `DATABASE_URL`
//! is set (`ApiConfig::database_url`); everything downstream is written
//! against the `EventLog`/`WorkQueue` traits and never matches on the
//! variant itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::persistence::{
    ChildCompletion, EventLog, IterationResult, NackOutcome, NodeStatus, StoreError,
};
use flowline_core::{InMemoryStore, PostgresStore, WorkQueue};
use flowline_contracts::{Event, EventType, JobStatus, QueueJob};
use uuid::Uuid;

pub enum AnyStore {
    Memory(InMemoryStore),
    Postgres(PostgresStore),
}

macro_rules! delegate {
    ($self:expr, $method:ident ( $($arg:expr),* )) => {
        match $self {
            AnyStore::Memory(s) => s.$method($($arg),*).await,
            AnyStore::Postgres(s) => s.$method($($arg),*).await,
        }
    };
}

#[async_trait]
impl EventLog for AnyStore {
    async fn append(&self, event: Event) -> Result<Event, StoreError> {
        delegate!(self, append(event))
    }

    async fn fetch_by_execution(&self, execution_id: i64) -> Result<Vec<Event>, StoreError> {
        delegate!(self, fetch_by_execution(execution_id))
    }

    async fn fetch_by_event_id(
        &self,
        execution_id: i64,
        event_id: i64,
    ) -> Result<Option<Event>, StoreError> {
        delegate!(self, fetch_by_event_id(execution_id, event_id))
    }

    async fn count_where(
        &self,
        execution_id: i64,
        event_type: EventType,
        node_name: Option<&str>,
    ) -> Result<i64, StoreError> {
        delegate!(self, count_where(execution_id, event_type, node_name))
    }

    async fn list_statuses(&self, execution_id: i64) -> Result<Vec<NodeStatus>, StoreError> {
        delegate!(self, list_statuses(execution_id))
    }

    async fn latest_non_empty_result(
        &self,
        execution_id: i64,
        node_name: Option<&str>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        delegate!(self, latest_non_empty_result(execution_id, node_name))
    }

    async fn get_workload(&self, execution_id: i64) -> Result<Option<serde_json::Value>, StoreError> {
        delegate!(self, get_workload(execution_id))
    }

    async fn count_loop_iterations(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<i64, StoreError> {
        delegate!(self, count_loop_iterations(execution_id, loop_name))
    }

    async fn fetch_loop_iteration_results(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<IterationResult>, StoreError> {
        delegate!(self, fetch_loop_iteration_results(execution_id, loop_name))
    }

    async fn find_child_execution_completions(
        &self,
        parent_execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<ChildCompletion>, StoreError> {
        delegate!(
            self,
            find_child_execution_completions(parent_execution_id, loop_name)
        )
    }
}

#[async_trait]
impl WorkQueue for AnyStore {
    async fn enqueue(
        &self,
        execution_id: i64,
        node_id: &str,
        action: serde_json::Value,
        context: serde_json::Value,
        priority: i32,
        max_attempts: i32,
        available_at: DateTime<Utc>,
    ) -> Result<QueueJob, StoreError> {
        delegate!(
            self,
            enqueue(
                execution_id,
                node_id,
                action,
                context,
                priority,
                max_attempts,
                available_at
            )
        )
    }

    async fn has_in_flight(&self, execution_id: i64, node_id: &str) -> Result<bool, StoreError> {
        delegate!(self, has_in_flight(execution_id, node_id))
    }

    async fn lease(
        &self,
        worker_id: &str,
        lease_seconds: u32,
    ) -> Result<Option<QueueJob>, StoreError> {
        delegate!(self, lease(worker_id, lease_seconds))
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extend_seconds: Option<u32>,
    ) -> Result<(), StoreError> {
        delegate!(self, heartbeat(job_id, worker_id, extend_seconds))
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), StoreError> {
        delegate!(self, ack(job_id))
    }

    async fn nack(
        &self,
        job_id: Uuid,
        retry_delay: Option<chrono::Duration>,
    ) -> Result<NackOutcome, StoreError> {
        delegate!(self, nack(job_id, retry_delay))
    }

    async fn reap_expired(&self) -> Result<Vec<Uuid>, StoreError> {
        delegate!(self, reap_expired())
    }

    async fn size_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        delegate!(self, size_by_status(status))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<QueueJob>, StoreError> {
        delegate!(self, get(job_id))
    }
}
