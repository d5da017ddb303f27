//! Aggregator Job (C11): folds a completed loop's per-iteration results
//! into a single ordered array and emits a `result` event bound to the
//! aggregation node.
//!
//! The Broker's Loop Coordinator (`flowline_core::LoopCoordinator`) already
//! emits the loop's own terminal `action_completed`/`result` pair inline
//! when every iteration lands (so the Broker's state machine is never
//! blocked on a worker being available); this job is the supplementary,
//! worker-side routine, addressed to the distinct
//! `{execution_id}:{loop_step}:aggregate` node the Broker enqueues
//! alongside that inline finalization. Queueing it keeps aggregation
//! pressure on the event log bounded by queue capacity rather than
//! unconditional inline work.

use flowline_contracts::{Event, EventStatus, EventType, NodeType, QueueJob};
use serde::Deserialize;
use serde_json::Value;

use crate::client::ServerClient;
use crate::error::WorkerError;

#[derive(Debug, Deserialize)]
struct AggregationAction {
    parent_execution_id: i64,
    loop_step: String,
    iteration_event_ids: Vec<i64>,
}

pub async fn run(client: &ServerClient, job: &QueueJob) -> Result<(), WorkerError> {
    let action: AggregationAction = serde_json::from_value(job.action.clone())?;

    let mut iterations = Vec::with_capacity(action.iteration_event_ids.len());
    for event_id in &action.iteration_event_ids {
        match client.get_event(action.parent_execution_id, *event_id).await {
            Ok(event) => iterations.push(event),
            Err(e) => {
                tracing::warn!(
                    execution_id = action.parent_execution_id,
                    event_id,
                    error = %e,
                    "aggregator: could not load iteration event, skipping"
                );
            }
        }
    }
    let aggregate = aggregate_by_index(iterations);

    let mut result_event = Event::new(job.execution_id, EventType::Result, job.node_id.clone());
    result_event.node_name = Some(action.loop_step);
    result_event.node_type = Some(NodeType::Loop);
    result_event.status = EventStatus::Completed;
    result_event.result = aggregate;
    client.append_event(&result_event).await?;

    Ok(())
}

/// Sort iteration events by `current_index` and fold their results into the
/// `{results, count}` shape the Loop Coordinator's own inline finalization
/// also produces, so the two aggregation paths agree on the wire.
fn aggregate_by_index(mut iterations: Vec<Event>) -> Value {
    iterations.sort_by_key(|e| e.loop_meta.current_index.unwrap_or(i64::MAX));
    let results: Vec<Value> = iterations.iter().map(|e| e.result.clone()).collect();
    serde_json::json!({
        "results": results,
        "count": results.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_contracts::LoopMeta;
    use serde_json::json;

    fn iteration_event(index: i64, result: Value) -> Event {
        let mut e = Event::new(1, EventType::ActionCompleted, format!("1:c:{index}"));
        e.status = EventStatus::Completed;
        e.result = result;
        e.loop_meta = LoopMeta {
            current_index: Some(index),
            ..Default::default()
        };
        e
    }

    #[test]
    fn orders_results_by_iteration_index_regardless_of_input_order() {
        let events = vec![
            iteration_event(2, json!({"temp": 2})),
            iteration_event(0, json!({"temp": 0})),
            iteration_event(1, json!({"temp": 1})),
        ];

        let aggregate = aggregate_by_index(events);
        assert_eq!(
            aggregate["results"],
            json!([{"temp": 0}, {"temp": 1}, {"temp": 2}])
        );
        assert_eq!(aggregate["count"], json!(3));
    }

    #[test]
    fn events_missing_an_index_sort_last() {
        let mut unindexed = iteration_event(0, json!({"temp": "x"}));
        unindexed.loop_meta.current_index = None;
        let events = vec![unindexed, iteration_event(0, json!({"temp": 0}))];

        let aggregate = aggregate_by_index(events);
        assert_eq!(aggregate["results"][0], json!({"temp": 0}));
        assert_eq!(aggregate["results"][1], json!({"temp": "x"}));
    }
}
