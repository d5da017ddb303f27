//! Loop Coordinator (C7): expands a step's `loop` block into per-item
//! iteration jobs and, once every iteration has a meaningful result,
//! aggregates them into the loop step's final result.

use std::sync::Arc;

use flowline_contracts::{Event, EventStatus, EventType, LoopMeta, LoopMode, NodeType, Step};
use serde_json::{json, Value};

use crate::persistence::{EventLog, WorkQueue};
use crate::renderer::Renderer;

use super::error::BrokerError;

/// A loop step that just reached completion this tick, returned so the
/// Broker can resolve its post-loop transition with the same machinery it
/// uses for ordinary steps.
pub struct LoopCompletion {
    pub step_name: String,
    pub aggregate: Value,
}

pub struct LoopCoordinator {
    renderer: Arc<Renderer>,
}

impl LoopCoordinator {
    pub fn new(renderer: Arc<Renderer>) -> Self {
        Self { renderer }
    }

    /// Render `step.loop.in`, emit idempotent `loop_iteration` events, and
    /// enqueue one job per item. `context` already has the step's own
    /// `with`/transition `with` merged in; each iteration additionally
    /// binds the iterator variable and `_loop` metadata.
    pub async fn expand<S: EventLog + WorkQueue>(
        &self,
        store: &S,
        execution_id: i64,
        step: &Step,
        context: &Value,
    ) -> Result<(), BrokerError> {
        let spec = step
            .r#loop
            .as_ref()
            .ok_or_else(|| BrokerError::MissingLoopSpec(step.step.clone()))?;

        let items = self.renderer.eval(&spec.in_expr, context)?;
        let items = items.as_array().cloned().unwrap_or_default();
        let total = items.len() as i64;

        let existing = store.fetch_by_execution(execution_id).await?;
        let already_emitted: std::collections::HashSet<i64> = existing
            .iter()
            .filter(|e| {
                e.event_type == EventType::LoopIteration
                    && e.loop_meta.loop_name.as_deref() == Some(step.step.as_str())
            })
            .filter_map(|e| e.loop_meta.current_index)
            .collect();

        for (idx, item) in items.iter().enumerate() {
            let idx = idx as i64;
            let node_id = format!("{execution_id}:{}:{idx}", step.step);

            if !already_emitted.contains(&idx) {
                let mut iteration = Event::new(execution_id, EventType::LoopIteration, node_id.clone());
                iteration.node_name = Some(step.step.clone());
                iteration.node_type = Some(NodeType::Loop);
                iteration.status = EventStatus::Pending;
                iteration.loop_meta = LoopMeta {
                    loop_id: Some(format!("{execution_id}:{}", step.step)),
                    loop_name: Some(step.step.clone()),
                    iterator: Some(spec.iterator.clone()),
                    current_index: Some(idx),
                    current_item: Some(item.clone()),
                };
                store.append(iteration).await?;
            }

            let mut iter_context = context.clone();
            if let Some(obj) = iter_context.as_object_mut() {
                obj.insert(spec.iterator.clone(), item.clone());
                obj.insert(
                    "_loop".to_string(),
                    json!({
                        "loop_id": format!("{execution_id}:{}", step.step),
                        "loop_name": step.step,
                        "iterator": spec.iterator,
                        "current_index": idx,
                        "current_item": item,
                        "items_count": total,
                    }),
                );
                obj.insert("work".to_string(), json!({ "step_name": step.step }));
            }

            let priority = match spec.mode {
                LoopMode::Async => 0,
                LoopMode::Sequential => -(idx as i32),
            };

            let action = serde_json::to_value(step).unwrap_or(Value::Null);
            store
                .enqueue(
                    execution_id,
                    &node_id,
                    action,
                    iter_context,
                    priority,
                    step_max_attempts(step),
                    chrono::Utc::now(),
                )
                .await?;
        }

        Ok(())
    }

    /// Refresh completion tracking for every in-flight loop step of this
    /// execution. Returns the loop steps that completed (aggregated and
    /// finalized) on *this* call, so the caller can drive their post-loop
    /// transition.
    pub async fn check_and_finalize<S: EventLog + WorkQueue>(
        &self,
        store: &S,
        execution_id: i64,
    ) -> Result<Vec<LoopCompletion>, BrokerError> {
        let events = store.fetch_by_execution(execution_id).await?;

        let mut loop_names: Vec<String> = events
            .iter()
            .filter(|e| e.event_type == EventType::LoopIteration)
            .filter_map(|e| e.loop_meta.loop_name.clone())
            .collect();
        loop_names.sort();
        loop_names.dedup();

        let mut completions = Vec::new();

        for loop_name in loop_names {
            let already_finalized = events.iter().any(|e| {
                e.event_type == EventType::ActionCompleted
                    && e.node_name.as_deref() == Some(loop_name.as_str())
                    && e.context.get("loop_completed").and_then(Value::as_bool) == Some(true)
            });
            if already_finalized {
                continue;
            }

            let total = store.count_loop_iterations(execution_id, &loop_name).await?;
            if total == 0 {
                continue;
            }
            let results = store
                .fetch_loop_iteration_results(execution_id, &loop_name)
                .await?;

            self.refresh_tracking(store, execution_id, &loop_name, total, results.len() as i64)
                .await?;

            if results.len() as i64 != total {
                continue;
            }

            let aggregate = json!({
                "results": results.iter().map(|r| r.result.clone()).collect::<Vec<_>>(),
                "count": total,
                "data": results.iter().map(|r| r.result.clone()).collect::<Vec<_>>(),
            });

            let node_id = format!("{execution_id}:{loop_name}");

            let mut completed = Event::new(execution_id, EventType::ActionCompleted, node_id.clone());
            completed.node_name = Some(loop_name.clone());
            completed.node_type = Some(NodeType::Loop);
            completed.status = EventStatus::Completed;
            completed.result = aggregate.clone();
            completed.context = json!({ "loop_completed": true });
            store.append(completed).await?;

            let mut result_event = Event::new(execution_id, EventType::Result, node_id.clone());
            result_event.node_name = Some(loop_name.clone());
            result_event.node_type = Some(NodeType::Loop);
            result_event.status = EventStatus::Completed;
            result_event.result = aggregate.clone();
            store.append(result_event).await?;

            let mut step_completed = Event::new(execution_id, EventType::StepCompleted, node_id.clone());
            step_completed.node_name = Some(loop_name.clone());
            step_completed.status = EventStatus::Completed;
            store.append(step_completed).await?;

            let mut marker = Event::new(execution_id, EventType::LoopCompleted, node_id.clone());
            marker.node_name = Some(loop_name.clone());
            marker.node_type = Some(NodeType::Control);
            marker.status = EventStatus::Completed;
            store.append(marker).await?;

            let iteration_event_ids: Vec<i64> = events
                .iter()
                .filter(|e| {
                    e.event_type == EventType::ActionCompleted
                        && e.loop_meta.loop_name.as_deref() == Some(loop_name.as_str())
                        && e.loop_meta.current_index.is_some()
                })
                .filter_map(|e| e.event_id)
                .collect();

            let aggregation_action = json!({
                "type": "result_aggregation",
                "parent_execution_id": execution_id,
                "loop_step": loop_name,
                "iteration_event_ids": iteration_event_ids,
            });
            store
                .enqueue(
                    execution_id,
                    &format!("{execution_id}:{loop_name}:aggregate"),
                    aggregation_action,
                    json!({ "loop_name": loop_name }),
                    0,
                    1,
                    chrono::Utc::now(),
                )
                .await?;

            completions.push(LoopCompletion {
                step_name: loop_name,
                aggregate,
            });
        }

        Ok(completions)
    }

    async fn refresh_tracking<S: EventLog + WorkQueue>(
        &self,
        store: &S,
        execution_id: i64,
        loop_name: &str,
        total: i64,
        completed_count: i64,
    ) -> Result<(), BrokerError> {
        let events = store.fetch_by_execution(execution_id).await?;
        let latest_count = events
            .iter()
            .rev()
            .filter(|e| {
                e.event_type == EventType::EndLoop && e.loop_meta.loop_name.as_deref() == Some(loop_name)
            })
            .find_map(|e| e.result.get("completed_count").and_then(Value::as_i64));

        if latest_count == Some(completed_count) {
            return Ok(());
        }

        let mut tracking = Event::new(
            execution_id,
            EventType::EndLoop,
            format!("{execution_id}:{loop_name}:tracker"),
        );
        tracking.node_name = Some(loop_name.to_string());
        tracking.node_type = Some(NodeType::LoopTracker);
        tracking.status = EventStatus::Tracking;
        tracking.loop_meta = LoopMeta {
            loop_name: Some(loop_name.to_string()),
            ..Default::default()
        };
        tracking.result = json!({ "completed_count": completed_count, "total": total });
        store.append(tracking).await?;
        Ok(())
    }
}

fn step_max_attempts(step: &Step) -> i32 {
    let cfg: Option<flowline_contracts::RetryConfig> = step.retry.clone().map(Into::into).flatten();
    cfg.map(|c| c.max_attempts as i32).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use flowline_contracts::JobStatus;
    use serde_json::json;

    fn loop_step() -> Step {
        serde_json::from_value(json!({
            "step": "c",
            "type": "python",
            "code": "pass",
            "loop": {"in": "{{ workload.cities }}", "iterator": "city", "mode": "async"},
            "next": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn expand_enqueues_one_job_per_item_and_loop_iteration_events() {
        let store = InMemoryStore::new();
        let coordinator = LoopCoordinator::new(Arc::new(Renderer::new()));
        let ctx = json!({"workload": {"cities": ["LDN", "PAR", "BER"]}});
        coordinator.expand(&store, 1, &loop_step(), &ctx).await.unwrap();

        let events = store.fetch_by_execution(1).await.unwrap();
        let iterations = events
            .iter()
            .filter(|e| e.event_type == EventType::LoopIteration)
            .count();
        assert_eq!(iterations, 3);
        assert_eq!(store.job_count(), 3);
    }

    #[tokio::test]
    async fn expand_is_idempotent_on_rerun() {
        let store = InMemoryStore::new();
        let coordinator = LoopCoordinator::new(Arc::new(Renderer::new()));
        let ctx = json!({"workload": {"cities": ["LDN", "PAR"]}});
        coordinator.expand(&store, 1, &loop_step(), &ctx).await.unwrap();
        coordinator.expand(&store, 1, &loop_step(), &ctx).await.unwrap();
        assert_eq!(store.job_count(), 2);
    }

    #[tokio::test]
    async fn finalize_aggregates_once_all_iterations_complete() {
        let store = InMemoryStore::new();
        let coordinator = LoopCoordinator::new(Arc::new(Renderer::new()));
        let ctx = json!({"workload": {"cities": ["LDN", "PAR"]}});
        coordinator.expand(&store, 1, &loop_step(), &ctx).await.unwrap();

        for idx in 0..2i64 {
            let mut e = Event::new(1, EventType::ActionCompleted, format!("1:c:{idx}"));
            e.node_name = Some("c".to_string());
            e.status = EventStatus::Completed;
            e.result = json!({"temp": 3});
            e.loop_meta = LoopMeta {
                loop_name: Some("c".to_string()),
                current_index: Some(idx),
                ..Default::default()
            };
            store.append(e).await.unwrap();
        }

        let completions = coordinator.check_and_finalize(&store, 1).await.unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].step_name, "c");
        assert_eq!(
            completions[0].aggregate["results"],
            json!([{"temp": 3}, {"temp": 3}])
        );

        // A second tick must not duplicate the final action_completed.
        let completions_again = coordinator.check_and_finalize(&store, 1).await.unwrap();
        assert!(completions_again.is_empty());
        let final_count = store
            .fetch_by_execution(1)
            .await
            .unwrap()
            .iter()
            .filter(|e| {
                e.event_type == EventType::ActionCompleted
                    && e.context.get("loop_completed").and_then(Value::as_bool) == Some(true)
            })
            .count();
        assert_eq!(final_count, 1);

        assert_eq!(store.size_by_status(JobStatus::Queued).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn sequential_mode_priorities_strictly_decrease() {
        let store = InMemoryStore::new();
        let coordinator = LoopCoordinator::new(Arc::new(Renderer::new()));
        let mut step = loop_step();
        step.r#loop.as_mut().unwrap().mode = LoopMode::Sequential;
        let ctx = json!({"workload": {"cities": ["LDN", "PAR", "BER"]}});
        coordinator.expand(&store, 1, &step, &ctx).await.unwrap();

        let first = store.lease("w1", 30).await.unwrap().unwrap();
        assert_eq!(first.node_id, "1:c:0");
    }
}
