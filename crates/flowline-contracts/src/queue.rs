//! Work queue job DTOs shared across the lease/heartbeat/ack/nack protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    Done,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }
}

/// A queue row: one pending-or-in-flight step execution.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueueJob {
    pub id: uuid::Uuid,
    pub execution_id: i64,
    pub node_id: String,
    #[schema(value_type = Object)]
    pub action: serde_json::Value,
    #[schema(value_type = Object)]
    pub context: serde_json::Value,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnqueueRequest {
    pub execution_id: i64,
    pub node_id: String,
    #[schema(value_type = Object)]
    pub action: serde_json::Value,
    #[schema(value_type = Object)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub available_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaseRequest {
    pub worker_id: String,
    pub lease_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaseResponse {
    pub job: Option<QueueJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    #[serde(default)]
    pub extend_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FailRequest {
    #[serde(default)]
    pub retry_delay_seconds: Option<f64>,
    #[serde(default)]
    pub retry: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueueSizeResponse {
    pub status: JobStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PoolStatus {
    pub utilization: f64,
    pub slots_available: i64,
    pub requests_waiting: i64,
    pub pool_max: i64,
}
