//! Work Queue HTTP surface: lease/heartbeat/complete/fail/reap-expired/size
//! (§4.2, §6). `complete`/`fail` drive the Retry Controller (§4.6) and emit
//! its companion events; the worker is still responsible for emitting its
//! own `action_started`/`action_completed`/`action_error` via `POST /events`.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use flowline_contracts::{
    EnqueueRequest, Event, EventStatus, EventType, FailRequest, HeartbeatRequest, JobStatus,
    LeaseRequest, LeaseResponse, QueueJob, QueueSizeResponse, RetryConfig, RetrySpec, Step,
};
use flowline_core::{EventLog, WorkQueue};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/queue/enqueue", post(enqueue))
        .route("/queue/lease", post(lease))
        .route("/queue/:id/heartbeat", post(heartbeat))
        .route("/queue/:id/complete", post(complete))
        .route("/queue/:id/fail", post(fail))
        .route("/queue/reap-expired", post(reap_expired))
        .route("/queue/size", get(size))
        .with_state(state)
}

/// POST /queue/enqueue — not part of the worker protocol; exposed so a
/// playbook/sub-playbook executor (or a test harness) can enqueue a job
/// directly instead of going through the Broker's own dispatch path.
#[utoipa::path(
    post,
    path = "/queue/enqueue",
    request_body = EnqueueRequest,
    responses((status = 200, description = "Job enqueued or the existing in-flight job", body = QueueJob)),
    tag = "queue"
)]
pub async fn enqueue(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<QueueJob>, ApiError> {
    let job = state
        .store
        .enqueue(
            req.execution_id,
            &req.node_id,
            req.action,
            req.context,
            req.priority,
            req.max_attempts.unwrap_or(1),
            req.available_at.unwrap_or_else(chrono::Utc::now),
        )
        .await?;
    Ok(Json(job))
}

/// POST /queue/lease — §4.2. At most one job per call.
#[utoipa::path(
    post,
    path = "/queue/lease",
    request_body = LeaseRequest,
    responses((status = 200, description = "A leased job, or none available", body = LeaseResponse)),
    tag = "queue"
)]
pub async fn lease(
    State(state): State<AppState>,
    Json(req): Json<LeaseRequest>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let job = state.store.lease(&req.worker_id, req.lease_seconds).await?;
    Ok(Json(LeaseResponse { job }))
}

/// POST /queue/:id/heartbeat
#[utoipa::path(
    post,
    path = "/queue/{id}/heartbeat",
    params(("id" = Uuid, Path, description = "Job id")),
    request_body = HeartbeatRequest,
    responses((status = 204, description = "Heartbeat recorded")),
    tag = "queue"
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    state
        .store
        .heartbeat(id, &req.worker_id, req.extend_seconds)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /queue/:id/complete — ack.
#[utoipa::path(
    post,
    path = "/queue/{id}/complete",
    params(("id" = Uuid, Path, description = "Job id")),
    responses((status = 204, description = "Job marked done")),
    tag = "queue"
)]
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.ack(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /queue/:id/fail — nack, driven by the Retry Controller (§4.6)
/// unless the caller passes an explicit `retry` override.
#[utoipa::path(
    post,
    path = "/queue/{id}/fail",
    params(("id" = Uuid, Path, description = "Job id")),
    request_body = FailRequest,
    responses((status = 200, description = "Retry decision applied", body = FailOutcomeResponse)),
    tag = "queue"
)]
pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> Result<Json<FailOutcomeResponse>, ApiError> {
    let job = state.store.get(id).await?.ok_or(ApiError::NotFound)?;

    if let Some(explicit_retry) = req.retry {
        let outcome = if explicit_retry {
            let delay = req
                .retry_delay_seconds
                .map(|s| chrono::Duration::milliseconds((s * 1000.0).round() as i64));
            state.store.nack(id, delay).await?;
            FailOutcomeResponse {
                retried: true,
                delay_seconds: req.retry_delay_seconds,
            }
        } else {
            state.store.nack(id, None).await?;
            FailOutcomeResponse {
                retried: false,
                delay_seconds: None,
            }
        };
        return Ok(Json(outcome));
    }

    let step: Option<Step> = serde_json::from_value(job.action.clone()).ok();
    let config: RetryConfig = step
        .and_then(|s| s.retry)
        .and_then(|spec: RetrySpec| Option::<RetryConfig>::from(spec))
        .unwrap_or(RetryConfig {
            max_attempts: job.max_attempts.max(1) as u32,
            ..RetryConfig::default()
        });

    let failure_event = latest_failure_event(&state, &job, req.error.as_deref()).await?;

    let outcome = state
        .retry
        .handle_failure(
            state.store.as_ref(),
            id,
            job.execution_id,
            &job.node_id,
            failure_event.node_name.as_deref(),
            &config,
            job.attempts.max(1) as u32,
            &failure_event,
        )
        .await?;

    Ok(Json(match outcome {
        flowline_core::FailureOutcome::Retried { delay_seconds } => FailOutcomeResponse {
            retried: true,
            delay_seconds: Some(delay_seconds),
        },
        flowline_core::FailureOutcome::Exhausted => FailOutcomeResponse {
            retried: false,
            delay_seconds: None,
        },
    }))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct FailOutcomeResponse {
    pub retried: bool,
    pub delay_seconds: Option<f64>,
}

/// Reconstruct the failure event the Retry Controller evaluates against:
/// prefer the most recent `action_error` already persisted for this node
/// (the worker emits one via `POST /events` before calling `fail`); fall
/// back to a synthetic event carrying only the caller's `error` string.
async fn latest_failure_event(
    state: &AppState,
    job: &QueueJob,
    fallback_error: Option<&str>,
) -> Result<Event, ApiError> {
    let events = state.store.fetch_by_execution(job.execution_id).await?;
    if let Some(found) = events
        .iter()
        .rev()
        .find(|e| e.event_type == EventType::ActionError && e.node_id == job.node_id)
    {
        return Ok(found.clone());
    }

    let mut synthetic = Event::new(job.execution_id, EventType::ActionError, job.node_id.clone());
    synthetic.status = EventStatus::Failed;
    synthetic.error = fallback_error.map(str::to_string);
    Ok(synthetic)
}

/// POST /queue/reap-expired — §4.2. Safe to invoke concurrently.
#[utoipa::path(
    post,
    path = "/queue/reap-expired",
    responses((status = 200, description = "Ids of reclaimed jobs", body = Vec<Uuid>)),
    tag = "queue"
)]
pub async fn reap_expired(State(state): State<AppState>) -> Result<Json<Vec<Uuid>>, ApiError> {
    let reclaimed = state.store.reap_expired().await?;
    Ok(Json(reclaimed))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct QueueSizeParams {
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, parsed)
    }

    async fn enqueue_job(app: &Router, node_id: &str, max_attempts: i32) -> Value {
        let (status, job) = call(
            app,
            "POST",
            "/queue/enqueue",
            json!({
                "execution_id": 1,
                "node_id": node_id,
                "action": {"type": "http"},
                "context": {},
                "priority": 0,
                "max_attempts": max_attempts,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        job
    }

    #[tokio::test]
    async fn lease_returns_the_job_then_empty_queue() {
        let app = routes(test_state());
        enqueue_job(&app, "1:a", 3).await;

        let (status, body) = call(
            &app,
            "POST",
            "/queue/lease",
            json!({"worker_id": "w1", "lease_seconds": 30}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"]["node_id"], json!("1:a"));
        assert_eq!(body["job"]["status"], json!("leased"));

        let (_, empty) = call(
            &app,
            "POST",
            "/queue/lease",
            json!({"worker_id": "w1", "lease_seconds": 30}),
        )
        .await;
        assert_eq!(empty["job"], Value::Null);
    }

    #[tokio::test]
    async fn heartbeat_from_the_wrong_worker_is_rejected() {
        let app = routes(test_state());
        enqueue_job(&app, "1:a", 3).await;
        let (_, leased) = call(
            &app,
            "POST",
            "/queue/lease",
            json!({"worker_id": "w1", "lease_seconds": 30}),
        )
        .await;
        let id = leased["job"]["id"].as_str().unwrap();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/queue/{id}/heartbeat"),
            json!({"worker_id": "someone-else"}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/queue/{id}/heartbeat"),
            json!({"worker_id": "w1"}),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn complete_moves_size_from_leased_to_done() {
        let app = routes(test_state());
        enqueue_job(&app, "1:a", 3).await;
        let (_, leased) = call(
            &app,
            "POST",
            "/queue/lease",
            json!({"worker_id": "w1", "lease_seconds": 30}),
        )
        .await;
        let id = leased["job"]["id"].as_str().unwrap();

        let (status, _) = call(&app, "POST", &format!("/queue/{id}/complete"), Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, size) = call(&app, "GET", "/queue/size?status=done", Value::Null).await;
        assert_eq!(size["count"], json!(1));
        let (_, size) = call(&app, "GET", "/queue/size?status=leased", Value::Null).await;
        assert_eq!(size["count"], json!(0));
    }

    #[tokio::test]
    async fn fail_with_explicit_retry_override_requeues_with_the_given_delay() {
        let app = routes(test_state());
        enqueue_job(&app, "1:a", 5).await;
        let (_, leased) = call(
            &app,
            "POST",
            "/queue/lease",
            json!({"worker_id": "w1", "lease_seconds": 30}),
        )
        .await;
        let id = leased["job"]["id"].as_str().unwrap();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/queue/{id}/fail"),
            json!({"retry": true, "retry_delay_seconds": 5.0}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retried"], json!(true));
        assert_eq!(body["delay_seconds"], json!(5.0));

        let (_, size) = call(&app, "GET", "/queue/size?status=queued", Value::Null).await;
        assert_eq!(size["count"], json!(1));
    }

    #[tokio::test]
    async fn fail_exhausts_after_max_attempts_and_job_goes_dead() {
        let app = routes(test_state());
        // max_attempts=1: the single lease already consumed the budget, so
        // the default (no-override) retry policy must exhaust immediately.
        enqueue_job(&app, "1:a", 1).await;
        let (_, leased) = call(
            &app,
            "POST",
            "/queue/lease",
            json!({"worker_id": "w1", "lease_seconds": 30}),
        )
        .await;
        let id = leased["job"]["id"].as_str().unwrap();

        let (status, body) = call(&app, "POST", &format!("/queue/{id}/fail"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retried"], json!(false));

        let (_, size) = call(&app, "GET", "/queue/size?status=dead", Value::Null).await;
        assert_eq!(size["count"], json!(1));
        let (_, size) = call(&app, "GET", "/queue/size?status=queued", Value::Null).await;
        assert_eq!(size["count"], json!(0));
    }
}

/// GET /queue/size?status=... — backpressure telemetry.
#[utoipa::path(
    get,
    path = "/queue/size",
    params(QueueSizeParams),
    responses((status = 200, description = "Job count for the given status", body = QueueSizeResponse)),
    tag = "queue"
)]
pub async fn size(
    State(state): State<AppState>,
    Query(params): Query<QueueSizeParams>,
) -> Result<Json<QueueSizeResponse>, ApiError> {
    let count = state.store.size_by_status(params.status).await?;
    Ok(Json(QueueSizeResponse {
        status: params.status,
        count,
    }))
}
