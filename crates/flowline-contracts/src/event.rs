//! The event record: the only durable unit of state in an execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed vocabulary of event types the core understands.
///
/// A few legacy aliases are accepted on input (`execution_started` for
/// `execution_start`, `execution_completed` for `execution_complete`) but
/// never produced; `event_type()`/serialization always emit the canonical
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(alias = "execution_started")]
    ExecutionStart,
    #[serde(alias = "execution_completed")]
    ExecutionComplete,
    StepStarted,
    StepCompleted,
    StepRetry,
    StepRetryExhausted,
    StepFailedTerminal,
    ActionStarted,
    ActionCompleted,
    ActionError,
    Result,
    StepResult,
    LoopIteration,
    EndLoop,
    LoopCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStart => "execution_start",
            EventType::ExecutionComplete => "execution_complete",
            EventType::StepStarted => "step_started",
            EventType::StepCompleted => "step_completed",
            EventType::StepRetry => "step_retry",
            EventType::StepRetryExhausted => "step_retry_exhausted",
            EventType::StepFailedTerminal => "step_failed_terminal",
            EventType::ActionStarted => "action_started",
            EventType::ActionCompleted => "action_completed",
            EventType::ActionError => "action_error",
            EventType::Result => "result",
            EventType::StepResult => "step_result",
            EventType::LoopIteration => "loop_iteration",
            EventType::EndLoop => "end_loop",
            EventType::LoopCompleted => "loop_completed",
        }
    }

    /// Prefix-based node_type inference described in the Event Log's append contract.
    pub fn inferred_node_type(&self) -> NodeType {
        match self {
            EventType::ExecutionStart | EventType::ExecutionComplete => NodeType::Playbook,
            EventType::ActionStarted
            | EventType::ActionCompleted
            | EventType::ActionError
            | EventType::Result => NodeType::Task,
            EventType::LoopIteration | EventType::EndLoop | EventType::LoopCompleted => {
                NodeType::Loop
            }
            EventType::StepStarted | EventType::StepCompleted | EventType::StepResult => {
                NodeType::Step
            }
            EventType::StepRetry | EventType::StepRetryExhausted | EventType::StepFailedTerminal => {
                NodeType::Step
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::ActionError | EventType::StepFailedTerminal
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Playbook,
    Step,
    Task,
    Loop,
    Iterator,
    LoopTracker,
    Control,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Playbook => "playbook",
            NodeType::Step => "step",
            NodeType::Task => "task",
            NodeType::Loop => "loop",
            NodeType::Iterator => "iterator",
            NodeType::LoopTracker => "loop_tracker",
            NodeType::Control => "control",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Tracking,
}

impl EventStatus {
    /// "status containing failed/error" per the broker's state classification.
    pub fn is_failure_like(&self) -> bool {
        matches!(self, EventStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Running => "running",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Tracking => "tracking",
        }
    }
}

/// Loop-iteration metadata, extracted from `context._loop` when not set explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LoopMeta {
    pub loop_id: Option<String>,
    pub loop_name: Option<String>,
    pub iterator: Option<String>,
    pub current_index: Option<i64>,
    #[schema(value_type = Object)]
    pub current_item: Option<serde_json::Value>,
}

/// A single immutable record in an execution's event tree.
///
/// Keyed by `(execution_id, event_id)`; callers may supply `event_id` to
/// correlate asynchronously, otherwise the Event Log derives one.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub event_id: Option<i64>,
    pub execution_id: i64,
    pub event_type: EventType,
    pub node_id: String,
    pub node_name: Option<String>,
    pub node_type: Option<NodeType>,
    pub status: EventStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    #[serde(default, alias = "input_context")]
    #[schema(value_type = Object)]
    pub context: serde_json::Value,
    #[serde(default, alias = "output_result")]
    #[schema(value_type = Object)]
    pub result: serde_json::Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub error: Option<String>,
    pub parent_event_id: Option<i64>,
    pub parent_execution_id: Option<i64>,
    #[serde(flatten, default)]
    pub loop_meta: LoopMeta,
}

impl Event {
    /// Construct a minimal event for the given execution/type; the Event Log
    /// fills in everything else it is allowed to derive.
    pub fn new(execution_id: i64, event_type: EventType, node_id: impl Into<String>) -> Self {
        Self {
            event_id: None,
            execution_id,
            event_type,
            node_id: node_id.into(),
            node_name: None,
            node_type: None,
            status: EventStatus::Pending,
            timestamp: None,
            duration: None,
            context: serde_json::Value::Null,
            result: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            error: None,
            parent_event_id: None,
            parent_execution_id: None,
            loop_meta: LoopMeta::default(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = result;
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_deserialize_to_canonical_variant() {
        let v: EventType = serde_json::from_str("\"execution_started\"").unwrap();
        assert_eq!(v, EventType::ExecutionStart);
        assert_eq!(v.as_str(), "execution_start");

        let v: EventType = serde_json::from_str("\"execution_completed\"").unwrap();
        assert_eq!(v, EventType::ExecutionComplete);
    }

    #[test]
    fn node_type_inference_matches_event_prefix() {
        assert_eq!(
            EventType::ActionCompleted.inferred_node_type(),
            NodeType::Task
        );
        assert_eq!(EventType::LoopIteration.inferred_node_type(), NodeType::Loop);
        assert_eq!(EventType::ExecutionStart.inferred_node_type(), NodeType::Playbook);
    }

    #[test]
    fn context_accepts_legacy_input_context_alias() {
        let json = serde_json::json!({
            "execution_id": 1,
            "event_type": "action_completed",
            "node_id": "1:a",
            "status": "completed",
            "input_context": {"x": 1}
        });
        let event: Event = serde_json::from_value(json).unwrap();
        assert_eq!(event.context, serde_json::json!({"x": 1}));
    }
}
