//! Retry Controller (C6): decides whether a failed step is retried, and
//! with what delay, then drives the queue/event-log side effects of that
//! decision.

use std::sync::Arc;

use chrono::Utc;
use flowline_contracts::{Event, EventStatus, EventType, RetryConfig};
use rand::Rng;
use serde_json::{json, Value};

use crate::persistence::{EventLog, NackOutcome, StoreError, WorkQueue};
use crate::renderer::Renderer;

/// Outcome of the retry algorithm, before side effects are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_seconds: Option<f64>,
}

/// What `RetryController::handle_failure` did, for callers that want to log
/// or assert on it (tests, the fail-endpoint handler).
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Retried { delay_seconds: f64 },
    Exhausted,
}

pub struct RetryController {
    renderer: Arc<Renderer>,
}

impl RetryController {
    pub fn new(renderer: Arc<Renderer>) -> Self {
        Self { renderer }
    }

    /// Pure decision function: §4.6 steps 1-5. `attempt` is the attempt
    /// number that just failed (1-indexed, matching `QueueJob::attempts`
    /// after `lease` incremented it).
    pub fn decide(
        &self,
        config: &RetryConfig,
        attempt: u32,
        failure_context: &Value,
    ) -> RetryDecision {
        if attempt >= config.max_attempts {
            return RetryDecision {
                retry: false,
                delay_seconds: None,
            };
        }

        if let Some(stop_when) = &config.stop_when {
            if self.renderer.eval_condition(stop_when, failure_context) {
                return RetryDecision {
                    retry: false,
                    delay_seconds: None,
                };
            }
        }

        let should_retry = match &config.retry_when {
            Some(expr) => self.renderer.eval_condition(expr, failure_context),
            None => failure_context
                .get("event_type")
                .and_then(|v| v.as_str())
                .map(|t| t == "action_error" || t == "action_failed")
                .unwrap_or(true),
        };

        if !should_retry {
            return RetryDecision {
                retry: false,
                delay_seconds: None,
            };
        }

        let base = config.initial_delay * config.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = base.min(config.max_delay);
        let delay = if config.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * factor
        } else {
            capped
        };

        RetryDecision {
            retry: true,
            delay_seconds: Some(delay.max(0.0)),
        }
    }

    /// Build the standard failure-evaluation context described in §4.6 step 2.
    pub fn failure_context(
        execution_id: i64,
        node_id: &str,
        failure_event: &Event,
        attempt: u32,
    ) -> Value {
        let status_code = failure_event
            .result
            .get("status_code")
            .cloned()
            .unwrap_or(Value::Null);
        let data = failure_event
            .result
            .get("data")
            .cloned()
            .unwrap_or(Value::Null);
        json!({
            "result": failure_event.result,
            "error": failure_event.error,
            "status_code": status_code,
            "success": failure_event.status == EventStatus::Completed,
            "data": data,
            "attempt": attempt,
            "execution_id": execution_id,
            "node_id": node_id,
            "event_type": failure_event.event_type.as_str(),
            "status": failure_event.status.as_str(),
        })
    }

    /// Apply the decision: nack the queue job with the computed delay and
    /// emit `step_retry`, or mark terminal and emit
    /// `step_retry_exhausted` + `step_failed_terminal`.
    pub async fn handle_failure<S: EventLog + WorkQueue + ?Sized>(
        &self,
        store: &S,
        job_id: uuid::Uuid,
        execution_id: i64,
        node_id: &str,
        node_name: Option<&str>,
        config: &RetryConfig,
        attempt: u32,
        failure_event: &Event,
    ) -> Result<FailureOutcome, StoreError> {
        let failure_context = Self::failure_context(execution_id, node_id, failure_event, attempt);
        let decision = self.decide(config, attempt, &failure_context);

        if decision.retry {
            let delay = decision.delay_seconds.unwrap_or(0.0);
            let retry_delay = chrono::Duration::milliseconds((delay * 1000.0).round() as i64);
            let outcome = store.nack(job_id, Some(retry_delay)).await?;
            debug_assert_eq!(outcome, NackOutcome::Requeued);

            let mut event = Event::new(execution_id, EventType::StepRetry, node_id.to_string());
            event.node_name = node_name.map(|s| s.to_string());
            event.status = EventStatus::Pending;
            event.context = json!({
                "attempt": attempt,
                "max_attempts": config.max_attempts,
                "delay_seconds": delay,
                "next_attempt_at": Utc::now() + retry_delay,
            });
            store.append(event).await?;

            Ok(FailureOutcome::Retried {
                delay_seconds: delay,
            })
        } else {
            store.nack(job_id, None).await?;

            let mut exhausted = Event::new(
                execution_id,
                EventType::StepRetryExhausted,
                node_id.to_string(),
            );
            exhausted.node_name = node_name.map(|s| s.to_string());
            exhausted.status = EventStatus::Failed;
            exhausted.context = json!({"attempt": attempt, "max_attempts": config.max_attempts});
            store.append(exhausted).await?;

            let mut terminal = Event::new(
                execution_id,
                EventType::StepFailedTerminal,
                node_id.to_string(),
            );
            terminal.node_name = node_name.map(|s| s.to_string());
            terminal.status = EventStatus::Failed;
            terminal.error = failure_event.error.clone();
            store.append(terminal).await?;

            Ok(FailureOutcome::Exhausted)
        }
    }
}
