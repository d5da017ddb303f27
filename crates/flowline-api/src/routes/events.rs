//! `POST /events` — the Event Log's only write path, plus a narrow read
//! path the Aggregator Job (C11) needs to resolve the iteration results
//! named by a `result_aggregation` job's `iteration_event_ids`.
//!
//! `GET /events/:execution_id/:event_id` is not in the worker's closed API
//! table (§6) verbatim; it is the minimal extension the Aggregator Job
//! needs to load a loop step's completed iteration results, recorded as
//! such in DESIGN.md.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use flowline_contracts::Event;
use flowline_core::EventLog;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/events", post(append_event))
        .route("/events/:execution_id/:event_id", get(get_event))
        .with_state(state)
}

/// POST /events — append via the Event Log, then route the stored event to
/// the Broker through the Event Dispatcher (§4.9). Returns the canonical,
/// server-derived record.
#[utoipa::path(
    post,
    path = "/events",
    request_body = Event,
    responses(
        (status = 200, description = "Event appended (or the existing record, if a duplicate)", body = Event),
        (status = 500, description = "Store error")
    ),
    tag = "events"
)]
pub async fn append_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Result<Json<Event>, ApiError> {
    let stored = state.store.append(event).await?;
    state.dispatcher.dispatch(&stored).await?;
    Ok(Json(stored))
}

/// GET /events/:execution_id/:event_id — fetch one event by its primary
/// key. Used by the worker-side Aggregator Job to resolve the concrete
/// results behind a loop's `iteration_event_ids`.
#[utoipa::path(
    get,
    path = "/events/{execution_id}/{event_id}",
    params(
        ("execution_id" = i64, Path, description = "Execution id"),
        ("event_id" = i64, Path, description = "Event id within the execution")
    ),
    responses(
        (status = 200, description = "The event", body = Event),
        (status = 404, description = "No such event")
    ),
    tag = "events"
)]
pub async fn get_event(
    State(state): State<AppState>,
    Path((execution_id, event_id)): Path<(i64, i64)>,
) -> Result<Json<Event>, ApiError> {
    let event = state
        .store
        .fetch_by_event_id(execution_id, event_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use flowline_contracts::EventType;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_events_appends_and_assigns_event_id() {
        let app = routes(test_state());
        // `step_started` never reaches the broker (it's a pure progress
        // marker), so this exercises the Event Log without needing a
        // catalog entry behind it.
        let payload = json!({
            "execution_id": 1,
            "event_type": "step_started",
            "node_id": "1:a",
            "status": "running",
            "context": {"work": {"step_name": "a"}},
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = body_json(response).await;
        assert_eq!(stored["event_id"], json!(1));
        assert_eq!(stored["execution_id"], json!(1));
    }

    #[tokio::test]
    async fn duplicate_event_id_is_a_noop_and_get_returns_stored_record() {
        let state = test_state();
        let app = routes(state.clone());

        let payload = json!({
            "execution_id": 7,
            "event_id": 1,
            "event_type": "step_started",
            "node_id": "7:a",
            "status": "running",
            "context": {"workload": {"k": "v"}},
        });
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/events")
                        .header("content-type", "application/json")
                        .body(Body::from(payload.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let events = state.store.fetch_by_execution(7).await.unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == EventType::StepStarted)
                .count(),
            1
        );

        let get_response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/events/7/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_response.status(), StatusCode::OK);
        let fetched = body_json(get_response).await;
        assert_eq!(fetched["context"]["workload"]["k"], json!("v"));
    }

    #[tokio::test]
    async fn get_event_missing_returns_404() {
        let app = routes(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/events/404/404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
