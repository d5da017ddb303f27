//! PostgreSQL-backed `EventLog` + `WorkQueue`.
//!
//! Expects the following relations (DDL is an implementation detail; any
//! equivalent relational layout works):
//!
//! ```sql
//! CREATE SEQUENCE flowline_event_id_seq;
//!
//! CREATE TABLE flowline_event (
//!     execution_id BIGINT NOT NULL,
//!     event_id BIGINT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     node_id TEXT NOT NULL,
//!     node_name TEXT,
//!     node_type TEXT,
//!     status TEXT NOT NULL,
//!     timestamp TIMESTAMPTZ NOT NULL,
//!     duration DOUBLE PRECISION,
//!     context JSONB NOT NULL,
//!     result JSONB NOT NULL,
//!     metadata JSONB NOT NULL,
//!     error TEXT,
//!     parent_event_id BIGINT,
//!     parent_execution_id BIGINT,
//!     loop_id TEXT,
//!     loop_name TEXT,
//!     iterator TEXT,
//!     current_index BIGINT,
//!     current_item JSONB,
//!     PRIMARY KEY (execution_id, event_id)
//! );
//!
//! CREATE TABLE flowline_workload (
//!     execution_id BIGINT PRIMARY KEY,
//!     context JSONB NOT NULL
//! );
//!
//! CREATE TABLE flowline_error_log (
//!     id UUID PRIMARY KEY,
//!     execution_id BIGINT NOT NULL,
//!     event_id BIGINT,
//!     error TEXT,
//!     recorded_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE flowline_queue (
//!     id UUID PRIMARY KEY,
//!     execution_id BIGINT NOT NULL,
//!     node_id TEXT NOT NULL,
//!     action JSONB NOT NULL,
//!     context JSONB NOT NULL,
//!     priority INT NOT NULL,
//!     status TEXT NOT NULL,
//!     attempts INT NOT NULL,
//!     max_attempts INT NOT NULL,
//!     available_at TIMESTAMPTZ NOT NULL,
//!     worker_id TEXT,
//!     lease_until TIMESTAMPTZ,
//!     last_heartbeat TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_contracts::{Event, EventStatus, EventType, JobStatus, LoopMeta, NodeType, QueueJob};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::error::StoreError;
use super::event_log::{is_error_bearing, ChildCompletion, EventLog, IterationResult, NodeStatus};
use super::work_queue::{NackOutcome, WorkQueue};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    let event_type: String = row.get("event_type");
    let status: String = row.get("status");
    let node_type: Option<String> = row.get("node_type");

    Ok(Event {
        event_id: Some(row.get("event_id")),
        execution_id: row.get("execution_id"),
        event_type: parse_event_type(&event_type)?,
        node_id: row.get("node_id"),
        node_name: row.get("node_name"),
        node_type: node_type.map(|t| parse_node_type(&t)).transpose()?,
        status: parse_status(&status)?,
        timestamp: row.get("timestamp"),
        duration: row.get("duration"),
        context: row.get("context"),
        result: row.get("result"),
        metadata: row.get("metadata"),
        error: row.get("error"),
        parent_event_id: row.get("parent_event_id"),
        parent_execution_id: row.get("parent_execution_id"),
        loop_meta: LoopMeta {
            loop_id: row.get("loop_id"),
            loop_name: row.get("loop_name"),
            iterator: row.get("iterator"),
            current_index: row.get("current_index"),
            current_item: row.get("current_item"),
        },
    })
}

fn parse_event_type(s: &str) -> Result<EventType, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_node_type(s: &str) -> Result<NodeType, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_status(s: &str) -> Result<EventStatus, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<QueueJob, StoreError> {
    let status: String = row.get("status");
    Ok(QueueJob {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        action: row.get("action"),
        context: row.get("context"),
        priority: row.get("priority"),
        status: parse_job_status(&status)?,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        available_at: row.get("available_at"),
        worker_id: row.get("worker_id"),
        lease_until: row.get("lease_until"),
        last_heartbeat: row.get("last_heartbeat"),
        created_at: row.get("created_at"),
    })
}

fn parse_job_status(s: &str) -> Result<JobStatus, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl EventLog for PostgresStore {
    #[instrument(skip(self, event))]
    async fn append(&self, mut event: Event) -> Result<Event, StoreError> {
        if let Some(event_id) = event.event_id {
            if let Some(existing) = self.fetch_by_event_id(event.execution_id, event_id).await? {
                return Ok(existing);
            }
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("failed to start append transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let event_id: i64 = if let Some(id) = event.event_id {
            id
        } else {
            sqlx::query_scalar("SELECT nextval('flowline_event_id_seq')")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?
        };

        let last_event_id: Option<i64> = sqlx::query_scalar(
            "SELECT max(event_id) FROM flowline_event WHERE execution_id = $1",
        )
        .bind(event.execution_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        event.event_id = Some(event_id);
        if event.parent_event_id.is_none() {
            event.parent_event_id = last_event_id;
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        if event.node_type.is_none() {
            event.node_type = Some(event.event_type.inferred_node_type());
        }
        if event.node_name.is_none() {
            event.node_name = event
                .context
                .pointer("/work/step_name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        }
        if event.loop_meta.loop_id.is_none() {
            if let Some(loop_ctx) = event.context.get("_loop") {
                if let Ok(meta) = serde_json::from_value(loop_ctx.clone()) {
                    event.loop_meta = meta;
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO flowline_event (
                execution_id, event_id, event_type, node_id, node_name, node_type,
                status, timestamp, duration, context, result, metadata, error,
                parent_event_id, parent_execution_id,
                loop_id, loop_name, iterator, current_index, current_item
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ON CONFLICT (execution_id, event_id) DO NOTHING
            "#,
        )
        .bind(event.execution_id)
        .bind(event.event_id)
        .bind(event.event_type.as_str())
        .bind(&event.node_id)
        .bind(&event.node_name)
        .bind(event.node_type.map(|t| serde_json::to_value(t).unwrap().as_str().unwrap().to_string()))
        .bind(serde_json::to_value(event.status).unwrap().as_str().unwrap().to_string())
        .bind(event.timestamp)
        .bind(event.duration)
        .bind(&event.context)
        .bind(&event.result)
        .bind(&event.metadata)
        .bind(&event.error)
        .bind(event.parent_event_id)
        .bind(event.parent_execution_id)
        .bind(&event.loop_meta.loop_id)
        .bind(&event.loop_meta.loop_name)
        .bind(&event.loop_meta.iterator)
        .bind(event.loop_meta.current_index)
        .bind(&event.loop_meta.current_item)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("failed to insert event: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if event.event_type == EventType::ExecutionStart {
            sqlx::query(
                r#"
                INSERT INTO flowline_workload (execution_id, context)
                VALUES ($1, $2)
                ON CONFLICT (execution_id) DO NOTHING
                "#,
            )
            .bind(event.execution_id)
            .bind(&event.context)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        if is_error_bearing(&event) {
            sqlx::query(
                r#"
                INSERT INTO flowline_error_log (id, execution_id, event_id, error, recorded_at)
                VALUES ($1, $2, $3, $4, NOW())
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(event.execution_id)
            .bind(event.event_id)
            .bind(event.error.clone().unwrap_or_default())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(execution_id = event.execution_id, event_id, "appended event");
        Ok(event)
    }

    #[instrument(skip(self))]
    async fn fetch_by_execution(&self, execution_id: i64) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM flowline_event WHERE execution_id = $1 ORDER BY timestamp, event_id",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(row_to_event).collect()
    }

    #[instrument(skip(self))]
    async fn fetch_by_event_id(
        &self,
        execution_id: i64,
        event_id: i64,
    ) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM flowline_event WHERE execution_id = $1 AND event_id = $2",
        )
        .bind(execution_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(row_to_event).transpose()
    }

    #[instrument(skip(self))]
    async fn count_where(
        &self,
        execution_id: i64,
        event_type: EventType,
        node_name: Option<&str>,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM flowline_event
            WHERE execution_id = $1 AND event_type = $2
              AND ($3::text IS NULL OR node_name = $3)
            "#,
        )
        .bind(execution_id)
        .bind(event_type.as_str())
        .bind(node_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn list_statuses(&self, execution_id: i64) -> Result<Vec<NodeStatus>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (node_id) node_id, node_name, status, event_type
            FROM flowline_event
            WHERE execution_id = $1
            ORDER BY node_id, event_id DESC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let event_type: String = row.get("event_type");
                Ok(NodeStatus {
                    node_id: row.get("node_id"),
                    node_name: row.get("node_name"),
                    status: parse_status(&status)?,
                    event_type: parse_event_type(&event_type)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn latest_non_empty_result(
        &self,
        execution_id: i64,
        node_name: Option<&str>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT result FROM flowline_event
            WHERE execution_id = $1
              AND ($2::text IS NULL OR node_name = $2)
              AND result IS NOT NULL AND result != 'null'::jsonb
            ORDER BY event_id DESC
            "#,
        )
        .bind(execution_id)
        .bind(node_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        for row in rows {
            let result: serde_json::Value = row.get("result");
            if is_non_empty_value(&result) {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    async fn get_workload(&self, execution_id: i64) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT context FROM flowline_workload WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.map(|r| r.get("context")))
    }

    #[instrument(skip(self))]
    async fn count_loop_iterations(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM flowline_event
            WHERE execution_id = $1 AND event_type = 'loop_iteration' AND loop_name = $2
            "#,
        )
        .bind(execution_id)
        .bind(loop_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn fetch_loop_iteration_results(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<IterationResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (current_index) current_index, result
            FROM flowline_event
            WHERE execution_id = $1 AND loop_name = $2
              AND event_type = 'action_completed' AND current_index IS NOT NULL
            ORDER BY current_index, event_id DESC
            "#,
        )
        .bind(execution_id)
        .bind(loop_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut results: Vec<IterationResult> = rows
            .iter()
            .filter_map(|row| {
                let index: Option<i64> = row.get("current_index");
                let result: serde_json::Value = row.get("result");
                index
                    .filter(|_| is_non_empty_value(&result))
                    .map(|index| IterationResult { index, result })
            })
            .collect();
        results.sort_by_key(|r| r.index);
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn find_child_execution_completions(
        &self,
        parent_execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<ChildCompletion>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, node_id, result FROM flowline_event
            WHERE event_type = 'execution_complete'
              AND parent_execution_id = $1 AND loop_name = $2
            "#,
        )
        .bind(parent_execution_id)
        .bind(loop_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| ChildCompletion {
                child_execution_id: row.get("execution_id"),
                node_id: row.get("node_id"),
                result: row.get("result"),
            })
            .collect())
    }
}

fn is_non_empty_value(value: &serde_json::Value) -> bool {
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
impl WorkQueue for PostgresStore {
    #[instrument(skip(self, action, context))]
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
        if let Some(existing) = self.find_in_flight(execution_id, node_id).await? {
            return Ok(existing);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO flowline_queue (
                id, execution_id, node_id, action, context, priority, status,
                attempts, max_attempts, available_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'queued', 0, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(execution_id)
        .bind(node_id)
        .bind(&action)
        .bind(&context)
        .bind(priority)
        .bind(max_attempts)
        .bind(available_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to enqueue job: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row_to_job(&row)
    }

    #[instrument(skip(self))]
    async fn has_in_flight(&self, execution_id: i64, node_id: &str) -> Result<bool, StoreError> {
        Ok(self.find_in_flight(execution_id, node_id).await?.is_some())
    }

    #[instrument(skip(self))]
    async fn lease(
        &self,
        worker_id: &str,
        lease_seconds: u32,
    ) -> Result<Option<QueueJob>, StoreError> {
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM flowline_queue
                WHERE status = 'queued' AND available_at <= NOW()
                ORDER BY priority DESC, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE flowline_queue q
            SET status = 'leased',
                worker_id = $1,
                lease_until = NOW() + make_interval(secs => $2),
                last_heartbeat = NOW(),
                attempts = attempts + 1
            FROM claimable c
            WHERE q.id = c.id
            RETURNING q.*
            "#,
        )
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to lease job: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extend_seconds: Option<u32>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_queue
            SET last_heartbeat = NOW(),
                lease_until = CASE WHEN $3::double precision IS NULL THEN lease_until
                                    ELSE NOW() + make_interval(secs => $3) END
            WHERE id = $1 AND worker_id = $2 AND status = 'leased'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(extend_seconds.map(|s| s as f64))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseMismatch(job_id, worker_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ack(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE flowline_queue SET status = 'done' WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn nack(
        &self,
        job_id: Uuid,
        retry_delay: Option<chrono::Duration>,
    ) -> Result<NackOutcome, StoreError> {
        let row = sqlx::query(
            "SELECT attempts, max_attempts FROM flowline_queue WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::JobNotFound(job_id))?;

        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");

        if attempts >= max_attempts {
            sqlx::query("UPDATE flowline_queue SET status = 'dead', worker_id = NULL, lease_until = NULL WHERE id = $1")
                .bind(job_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(NackOutcome::Dead)
        } else {
            let available_at = Utc::now() + retry_delay.unwrap_or_default();
            sqlx::query(
                r#"
                UPDATE flowline_queue
                SET status = 'queued', worker_id = NULL, lease_until = NULL, available_at = $2
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(available_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(NackOutcome::Requeued)
        }
    }

    #[instrument(skip(self))]
    async fn reap_expired(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE flowline_queue
            SET status = 'queued', worker_id = NULL, lease_until = NULL
            WHERE status = 'leased' AND lease_until < NOW()
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    #[instrument(skip(self))]
    async fn size_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM flowline_queue WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn get(&self, job_id: Uuid) -> Result<Option<QueueJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM flowline_queue WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_job).transpose()
    }
}

impl PostgresStore {
    async fn find_in_flight(
        &self,
        execution_id: i64,
        node_id: &str,
    ) -> Result<Option<QueueJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM flowline_queue
            WHERE execution_id = $1 AND node_id = $2 AND status IN ('queued', 'leased')
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(row_to_job).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_event_type_round_trips_snake_case_and_rejects_garbage() {
        assert_eq!(parse_event_type("step_started").unwrap(), EventType::StepStarted);
        assert_eq!(parse_event_type("loop_completed").unwrap(), EventType::LoopCompleted);
        assert!(parse_event_type("not_a_type").is_err());
    }

    #[test]
    fn parse_event_type_accepts_legacy_aliases() {
        assert_eq!(parse_event_type("execution_started").unwrap(), EventType::ExecutionStart);
        assert_eq!(parse_event_type("execution_completed").unwrap(), EventType::ExecutionComplete);
    }

    #[test]
    fn parse_node_type_round_trips() {
        assert_eq!(parse_node_type("loop_tracker").unwrap(), NodeType::LoopTracker);
        assert!(parse_node_type("bogus").is_err());
    }

    #[test]
    fn parse_status_round_trips() {
        assert_eq!(parse_status("completed").unwrap(), EventStatus::Completed);
        assert!(parse_status("bogus").is_err());
    }

    #[test]
    fn parse_job_status_round_trips() {
        assert_eq!(parse_job_status("leased").unwrap(), JobStatus::Leased);
        assert!(parse_job_status("bogus").is_err());
    }

    #[test]
    fn is_non_empty_value_excludes_null_skipped_control_and_empty_objects() {
        assert!(!is_non_empty_value(&serde_json::Value::Null));
        assert!(!is_non_empty_value(&serde_json::json!({"skipped": true})));
        assert!(!is_non_empty_value(&serde_json::json!({"reason": "control_step"})));
        assert!(!is_non_empty_value(&serde_json::json!({})));
        assert!(is_non_empty_value(&serde_json::json!({"temp": 1})));
        assert!(is_non_empty_value(&serde_json::json!([1, 2])));
    }
}
