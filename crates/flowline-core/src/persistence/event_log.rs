//! Event Log: the append-only journal that is the primary state of every execution.

use async_trait::async_trait;
use chrono::Utc;
use flowline_contracts::{Event, EventStatus, EventType};

use super::error::StoreError;

/// One row of the `list_statuses` projection: the latest status observed
/// for a given node in an execution.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: String,
    pub node_name: Option<String>,
    pub status: EventStatus,
    pub event_type: EventType,
}

/// A single loop iteration's recorded outcome, used by the Loop Coordinator.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub index: i64,
    pub result: serde_json::Value,
}

/// A child execution's completion, as observed from the parent's perspective.
#[derive(Debug, Clone)]
pub struct ChildCompletion {
    pub child_execution_id: i64,
    pub node_id: String,
    pub result: serde_json::Value,
}

/// Append-only journal of lifecycle events.
///
/// Implementations must honor the derivation rules in `derive_event_fields`
/// before persisting: callers may omit `event_id`, `parent_event_id`,
/// `node_name`, `node_type`, and loop metadata, all of which the log fills
/// in deterministically from the execution's prior events and the event's
/// own context.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Append one event. Idempotent on `(execution_id, event_id)`: a
    /// duplicate insert is a no-op that returns the already-stored record.
    async fn append(&self, event: Event) -> Result<Event, StoreError>;

    async fn fetch_by_execution(&self, execution_id: i64) -> Result<Vec<Event>, StoreError>;

    async fn fetch_by_event_id(
        &self,
        execution_id: i64,
        event_id: i64,
    ) -> Result<Option<Event>, StoreError>;

    /// Count events of a given type (and, optionally, node_name) within an execution.
    async fn count_where(
        &self,
        execution_id: i64,
        event_type: EventType,
        node_name: Option<&str>,
    ) -> Result<i64, StoreError>;

    /// Latest status per node_id, for the Broker's state classification.
    async fn list_statuses(&self, execution_id: i64) -> Result<Vec<NodeStatus>, StoreError>;

    /// Most recent non-null, non-trivial result in the execution, optionally
    /// scoped to one node. Used to resolve `{{ <step>.result }}` references.
    async fn latest_non_empty_result(
        &self,
        execution_id: i64,
        node_name: Option<&str>,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// The workload row persisted on `execution_start`.
    async fn get_workload(&self, execution_id: i64) -> Result<Option<serde_json::Value>, StoreError>;

    // ---- Loop Coordinator queries ----

    async fn count_loop_iterations(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<i64, StoreError>;

    async fn fetch_loop_iteration_results(
        &self,
        execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<IterationResult>, StoreError>;

    async fn find_child_execution_completions(
        &self,
        parent_execution_id: i64,
        loop_name: &str,
    ) -> Result<Vec<ChildCompletion>, StoreError>;
}

/// Shared derivation logic applied by every `EventLog` implementation before
/// persisting an appended event. Kept as a free function so the Postgres and
/// in-memory backends apply exactly the same rules instead of drifting.
pub fn derive_event_fields(
    mut event: Event,
    next_event_id: i64,
    last_event_id_in_execution: Option<i64>,
) -> Event {
    if event.event_id.is_none() {
        event.event_id = Some(next_event_id);
    }
    if event.parent_event_id.is_none() {
        event.parent_event_id = last_event_id_in_execution;
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
    event
}

/// True when an appended event should also be written to the error-log sink:
/// its status is failure-like or it carries a non-null error.
pub fn is_error_bearing(event: &Event) -> bool {
    event.status.is_failure_like() || event.error.is_some() || event.event_type.is_failure()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_contracts::EventType;

    #[test]
    fn derive_fills_event_id_and_parent_when_absent() {
        let event = Event::new(1, EventType::StepStarted, "1:a");
        let derived = derive_event_fields(event, 7, Some(6));
        assert_eq!(derived.event_id, Some(7));
        assert_eq!(derived.parent_event_id, Some(6));
        assert!(derived.timestamp.is_some());
    }

    #[test]
    fn derive_honors_caller_supplied_event_id() {
        let mut event = Event::new(1, EventType::StepStarted, "1:a");
        event.event_id = Some(42);
        let derived = derive_event_fields(event, 7, Some(6));
        assert_eq!(derived.event_id, Some(42));
    }

    #[test]
    fn derive_infers_node_name_from_context() {
        let event = Event::new(1, EventType::ActionCompleted, "1:a")
            .with_context(serde_json::json!({"work": {"step_name": "a"}}));
        let derived = derive_event_fields(event, 1, None);
        assert_eq!(derived.node_name.as_deref(), Some("a"));
    }

    #[test]
    fn error_bearing_detects_failed_status_and_explicit_error() {
        let failed = Event::new(1, EventType::ActionError, "1:a")
            .with_status(EventStatus::Failed);
        assert!(is_error_bearing(&failed));

        let with_error = Event::new(1, EventType::ActionCompleted, "1:a").with_error("boom");
        assert!(is_error_bearing(&with_error));

        let clean = Event::new(1, EventType::StepStarted, "1:a");
        assert!(!is_error_bearing(&clean));
    }
}
