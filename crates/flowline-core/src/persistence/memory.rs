//! In-memory implementation of `EventLog` and `WorkQueue`, for tests and the
//! non-Postgres dev mode of `flowline-api`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_contracts::{Event, EventStatus, EventType, JobStatus, QueueJob};
use parking_lot::RwLock;
use uuid::Uuid;

use super::error::StoreError;
use super::event_log::{
    derive_event_fields, is_error_bearing, ChildCompletion, EventLog, IterationResult, NodeStatus,
};
use super::work_queue::{NackOutcome, WorkQueue};

/// In-memory event log + work queue, sharing one process-wide lock set.
///
/// Mirrors the semantics of the Postgres-backed store exactly (see
/// `postgres.rs`): same idempotency, same lease query ordering, same
/// error-log side effect. Intended for unit tests and local development.
pub struct InMemoryStore {
    events: RwLock<Vec<Event>>,
    workloads: RwLock<HashMap<i64, serde_json::Value>>,
    error_log: RwLock<Vec<Event>>,
    jobs: RwLock<HashMap<Uuid, QueueJob>>,
    next_event_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            workloads: RwLock::new(HashMap::new()),
            error_log: RwLock::new(Vec::new()),
            jobs: RwLock::new(HashMap::new()),
            next_event_id: AtomicI64::new(1),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Clear all data. Only used by tests.
    pub fn clear(&self) {
        self.events.write().clear();
        self.workloads.write().clear();
        self.error_log.write().clear();
        self.jobs.write().clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryStore {
    async fn append(&self, event: Event) -> Result<Event, StoreError> {
        // Idempotent on (execution_id, event_id) when the caller supplied one.
        if let Some(event_id) = event.event_id {
            let events = self.events.read();
            if let Some(existing) = events
                .iter()
                .find(|e| e.execution_id == event.execution_id && e.event_id == Some(event_id))
            {
                return Ok(existing.clone());
            }
        }

        let mut events = self.events.write();
        let last_event_id = events
            .iter()
            .rev()
            .find(|e| e.execution_id == event.execution_id)
            .and_then(|e| e.event_id);

        let next_id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let derived = derive_event_fields(event, next_id, last_event_id);

        if derived.event_type == EventType::ExecutionStart {
            self.workloads
                .write()
                .entry(derived.execution_id)
                .or_insert_with(|| derived.context.clone());
        }

        if is_error_bearing(&derived) {
            self.error_log.write().push(derived.clone());
        }

        events.push(derived.clone());
        Ok(derived)
    }

    async fn fetch_by_execution(&self, execution_id: i64) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn fetch_by_event_id(
        &self,
        execution_id: i64,
        event_id: i64,
    ) -> Result<Option<Event>, StoreError> {
        Ok(self
            .events
            .read()
            .iter()
            .find(|e| e.execution_id == execution_id && e.event_id == Some(event_id))
            .cloned())
    }

    async fn count_where(
        &self,
        execution_id: i64,
        event_type: EventType,
        node_name: Option<&str>,
    ) -> Result<i64, StoreError> {
        let count = self
            .events
            .read()
            .iter()
            .filter(|e| {
                e.execution_id == execution_id
                    && e.event_type == event_type
                    && node_name.map_or(true, |n| e.node_name.as_deref() == Some(n))
            })
            .count();
        Ok(count as i64)
    }

    async fn list_statuses(&self, execution_id: i64) -> Result<Vec<NodeStatus>, StoreError> {
        let events = self.events.read();
        let mut latest: HashMap<String, NodeStatus> = HashMap::new();
        for event in events.iter().filter(|e| e.execution_id == execution_id) {
            latest.insert(
                event.node_id.clone(),
                NodeStatus {
                    node_id: event.node_id.clone(),
                    node_name: event.node_name.clone(),
                    status: event.status,
                    event_type: event.event_type,
                },
            );
        }
        Ok(latest.into_values().collect())
    }

    async fn latest_non_empty_result(
        &self,
        execution_id: i64,
        node_name: Option<&str>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let events = self.events.read();
        let result = events
            .iter()
            .rev()
            .filter(|e| e.execution_id == execution_id)
            .filter(|e| node_name.map_or(true, |n| e.node_name.as_deref() == Some(n)))
            .find_map(|e| {
                if is_non_empty(&e.result) {
                    Some(e.result.clone())
                } else {
                    None
                }
            });
        Ok(result)
    }

    async fn get_workload(&self, execution_id: i64) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.workloads.read().get(&execution_id).cloned())
    }

    async fn count_loop_iterations(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<i64, StoreError> {
        let count = self
            .events
            .read()
            .iter()
            .filter(|e| {
                e.execution_id == execution_id
                    && e.event_type == EventType::LoopIteration
                    && e.loop_meta.loop_name.as_deref() == Some(loop_name)
            })
            .count();
        Ok(count as i64)
    }

    async fn fetch_loop_iteration_results(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<IterationResult>, StoreError> {
        let events = self.events.read();
        let mut by_index: HashMap<i64, serde_json::Value> = HashMap::new();
        for event in events.iter().filter(|e| {
            e.execution_id == execution_id && e.loop_meta.loop_name.as_deref() == Some(loop_name)
        }) {
            if let Some(index) = event.loop_meta.current_index {
                let preferred = match event.event_type {
                    EventType::ActionCompleted if is_non_empty(&event.result) => {
                        Some(event.result.clone())
                    }
                    _ => None,
                };
                if let Some(result) = preferred {
                    by_index.entry(index).or_insert(result);
                }
            }
        }
        let mut results: Vec<IterationResult> = by_index
            .into_iter()
            .map(|(index, result)| IterationResult { index, result })
            .collect();
        results.sort_by_key(|r| r.index);
        Ok(results)
    }

    async fn find_child_execution_completions(
        &self,
        parent_execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<ChildCompletion>, StoreError> {
        let events = self.events.read();
        Ok(events
            .iter()
            .filter(|e| {
                e.event_type == EventType::ExecutionComplete
                    && e.parent_execution_id == Some(parent_execution_id)
                    && e.loop_meta.loop_name.as_deref() == Some(loop_name)
            })
            .map(|e| ChildCompletion {
                child_execution_id: e.execution_id,
                node_id: e.node_id.clone(),
                result: e.result.clone(),
            })
            .collect())
    }
}

fn is_non_empty(value: &serde_json::Value) -> bool {
    if value.is_null() {
        return false;
    }
    if let Some(obj) = value.as_object() {
        if obj.get("skipped").and_then(|v| v.as_bool()) == Some(true) {
            return false;
        }
        if obj.get("reason").and_then(|v| v.as_str()) == Some("control_step") {
            return false;
        }
        return !obj.is_empty();
    }
    true
}

#[async_trait]
impl WorkQueue for InMemoryStore {
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
        let mut jobs = self.jobs.write();
        if let Some(existing) = jobs.values().find(|j| {
            j.execution_id == execution_id
                && j.node_id == node_id
                && matches!(j.status, JobStatus::Queued | JobStatus::Leased)
        }) {
            return Ok(existing.clone());
        }

        let job = QueueJob {
            id: Uuid::now_v7(),
            execution_id,
            node_id: node_id.to_string(),
            action,
            context,
            priority,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            available_at,
            worker_id: None,
            lease_until: None,
            last_heartbeat: None,
            created_at: Utc::now(),
        };
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn has_in_flight(&self, execution_id: i64, node_id: &str) -> Result<bool, StoreError> {
        Ok(self.jobs.read().values().any(|j| {
            j.execution_id == execution_id
                && j.node_id == node_id
                && matches!(j.status, JobStatus::Queued | JobStatus::Leased)
        }))
    }

    async fn lease(
        &self,
        worker_id: &str,
        lease_seconds: u32,
    ) -> Result<Option<QueueJob>, StoreError> {
        let mut jobs = self.jobs.write();
        let now = Utc::now();
        let chosen_id = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.available_at <= now)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|j| j.id);

        let Some(id) = chosen_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).expect("chosen id exists");
        job.status = JobStatus::Leased;
        job.worker_id = Some(worker_id.to_string());
        job.lease_until = Some(now + chrono::Duration::seconds(lease_seconds as i64));
        job.last_heartbeat = Some(now);
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extend_seconds: Option<u32>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        if job.worker_id.as_deref() != Some(worker_id) {
            return Err(StoreError::LeaseMismatch(job_id, worker_id.to_string()));
        }
        job.last_heartbeat = Some(Utc::now());
        if let Some(extend) = extend_seconds {
            job.lease_until = Some(Utc::now() + chrono::Duration::seconds(extend as i64));
        }
        Ok(())
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.status = JobStatus::Done;
        Ok(())
    }

    async fn nack(
        &self,
        job_id: Uuid,
        retry_delay: Option<chrono::Duration>,
    ) -> Result<NackOutcome, StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Dead;
            job.worker_id = None;
            job.lease_until = None;
            Ok(NackOutcome::Dead)
        } else {
            job.status = JobStatus::Queued;
            job.worker_id = None;
            job.lease_until = None;
            job.available_at = Utc::now() + retry_delay.unwrap_or_default();
            Ok(NackOutcome::Requeued)
        }
    }

    async fn reap_expired(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut jobs = self.jobs.write();
        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Leased {
                if let Some(lease_until) = job.lease_until {
                    if lease_until < now {
                        job.status = JobStatus::Queued;
                        job.worker_id = None;
                        job.lease_until = None;
                        reclaimed.push(job.id);
                    }
                }
            }
        }
        Ok(reclaimed)
    }

    async fn size_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| j.status == status)
            .count() as i64)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<QueueJob>, StoreError> {
        Ok(self.jobs.read().get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_contracts::EventType;

    fn event(execution_id: i64, event_type: EventType, node_id: &str) -> Event {
        Event::new(execution_id, event_type, node_id)
    }

    #[tokio::test]
    async fn append_is_idempotent_on_duplicate_event_id() {
        let store = InMemoryStore::new();
        let mut e = event(1, EventType::StepStarted, "1:a");
        e.event_id = Some(5);
        let first = store.append(e.clone()).await.unwrap();
        let second = store.append(e).await.unwrap();
        assert_eq!(first.event_id, second.event_id);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn append_derives_monotonic_event_ids_per_execution() {
        let store = InMemoryStore::new();
        let a = store
            .append(event(1, EventType::ExecutionStart, "1"))
            .await
            .unwrap();
        let b = store
            .append(event(1, EventType::StepStarted, "1:a"))
            .await
            .unwrap();
        assert!(b.event_id.unwrap() > a.event_id.unwrap());
        assert_eq!(b.parent_event_id, a.event_id);
    }

    #[tokio::test]
    async fn execution_start_persists_workload_once() {
        let store = InMemoryStore::new();
        let e = event(1, EventType::ExecutionStart, "1")
            .with_context(serde_json::json!({"mode": "fast"}));
        store.append(e).await.unwrap();
        let workload = store.get_workload(1).await.unwrap().unwrap();
        assert_eq!(workload, serde_json::json!({"mode": "fast"}));
    }

    #[tokio::test]
    async fn lease_returns_highest_priority_then_fifo() {
        let store = InMemoryStore::new();
        store
            .enqueue(
                1,
                "1:low",
                serde_json::json!({}),
                serde_json::json!({}),
                1,
                3,
                Utc::now(),
            )
            .await
            .unwrap();
        let high = store
            .enqueue(
                1,
                "1:high",
                serde_json::json!({}),
                serde_json::json!({}),
                10,
                3,
                Utc::now(),
            )
            .await
            .unwrap();

        let leased = store.lease("w1", 30).await.unwrap().unwrap();
        assert_eq!(leased.id, high.id);
    }

    #[tokio::test]
    async fn enqueue_skips_duplicate_in_flight_node() {
        let store = InMemoryStore::new();
        let first = store
            .enqueue(
                1,
                "1:a",
                serde_json::json!({}),
                serde_json::json!({}),
                0,
                3,
                Utc::now(),
            )
            .await
            .unwrap();
        let second = store
            .enqueue(
                1,
                "1:a",
                serde_json::json!({}),
                serde_json::json!({}),
                0,
                3,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn nack_marks_dead_once_attempts_exhausted() {
        let store = InMemoryStore::new();
        let job = store
            .enqueue(
                1,
                "1:a",
                serde_json::json!({}),
                serde_json::json!({}),
                0,
                1,
                Utc::now(),
            )
            .await
            .unwrap();
        store.lease("w1", 30).await.unwrap();
        let outcome = store.nack(job.id, None).await.unwrap();
        assert_eq!(outcome, NackOutcome::Dead);
        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dead);
    }

    #[tokio::test]
    async fn reap_expired_reclaims_stale_leases() {
        let store = InMemoryStore::new();
        let job = store
            .enqueue(
                1,
                "1:a",
                serde_json::json!({}),
                serde_json::json!({}),
                0,
                3,
                Utc::now(),
            )
            .await
            .unwrap();
        store.lease("w1", 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reclaimed = store.reap_expired().await.unwrap();
        assert_eq!(reclaimed, vec![job.id]);
        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }
}
