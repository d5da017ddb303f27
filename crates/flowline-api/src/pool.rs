//! Server-side pool status: the signal the worker's adaptive concurrency
//! gate (§4.10) both probes proactively (`GET /pool/status`) and discovers
//! reactively (a 503 from the gate middleware below).
//!
//! "Pool" here is the count of in-flight requests against the worker-facing
//! endpoints (`/events`, `/queue/*`, `/catalog/*`), used as a proxy for
//! pressure on the underlying store connection pool. It is intentionally a
//! simple atomic gauge rather than a real connection-pool introspection —
//! the core's contract with the worker is the `{utilization, slots_available,
//! requests_waiting, pool_max}` shape, not how a given deployment computes it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{extract::Request, Json};
use flowline_contracts::PoolStatus;

pub struct PoolGauge {
    active: AtomicI64,
    waiting: AtomicI64,
    max: i64,
}

impl PoolGauge {
    pub fn new(max: i64) -> Self {
        Self {
            active: AtomicI64::new(0),
            waiting: AtomicI64::new(0),
            max,
        }
    }

    pub fn status(&self) -> PoolStatus {
        let active = self.active.load(Ordering::Relaxed).max(0);
        let waiting = self.waiting.load(Ordering::Relaxed).max(0);
        let slots_available = (self.max - active).max(0);
        let utilization = if self.max > 0 {
            active as f64 / self.max as f64
        } else {
            0.0
        };
        PoolStatus {
            utilization,
            slots_available,
            requests_waiting: waiting,
            pool_max: self.max,
        }
    }
}

/// Middleware wrapping worker-facing routes: rejects with 503 once the
/// configured pool capacity is exceeded, matching the worker's adaptive
/// gate's `release_overload` trigger. Accepted requests increment `active`
/// for the duration of the handler so `GET /pool/status` reflects live
/// pressure.
pub async fn pool_gate(
    State(gauge): State<Arc<PoolGauge>>,
    request: Request,
    next: Next,
) -> Response {
    let active = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
    if active > gauge.max {
        gauge.active.fetch_sub(1, Ordering::SeqCst);
        gauge.waiting.fetch_add(1, Ordering::SeqCst);
        let resp = (StatusCode::SERVICE_UNAVAILABLE, "pool saturated").into_response();
        gauge.waiting.fetch_sub(1, Ordering::SeqCst);
        return resp;
    }

    let response = next.run(request).await;
    gauge.active.fetch_sub(1, Ordering::SeqCst);
    response
}

pub async fn pool_status(State(gauge): State<Arc<PoolGauge>>) -> Json<PoolStatus> {
    Json(gauge.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn status_reports_utilization_and_remaining_slots() {
        let gauge = PoolGauge::new(4);
        gauge.active.store(3, Ordering::SeqCst);
        let status = gauge.status();
        assert_eq!(status.slots_available, 1);
        assert_eq!(status.pool_max, 4);
        assert!((status.utilization - 0.75).abs() < 1e-9);
    }

    #[test]
    fn status_with_zero_capacity_reports_zero_utilization_instead_of_dividing_by_zero() {
        let gauge = PoolGauge::new(0);
        assert_eq!(gauge.status().utilization, 0.0);
    }

    fn app(max: i64) -> Router {
        let gauge = Arc::new(PoolGauge::new(max));
        Router::new()
            .route("/work", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(gauge, pool_gate))
    }

    #[tokio::test]
    async fn pool_gate_rejects_once_capacity_is_exceeded() {
        let app = app(0);
        let response = app
            .oneshot(Request::builder().uri("/work").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn pool_gate_admits_requests_within_capacity() {
        let app = app(4);
        let response = app
            .oneshot(Request::builder().uri("/work").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
