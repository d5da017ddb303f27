//! Construction of the context tree the Renderer evaluates expressions
//! against: `workload` plus every prior step's result keyed by step name,
//! plus the conventional empty-by-default top-level keys playbooks
//! reference (`work`, `input`, `data`, `env`, `job`, `keychain`).

use flowline_contracts::{Event, EventType};
use serde_json::{Map, Value};

use crate::persistence::{EventLog, StoreError};

/// Build the context tree for evaluating a playbook expression at the
/// current point in `execution_id`'s history. `current_step` (if given) is
/// stamped into `work.step_name` so the Event Log's node-name inference
/// (`context.work.step_name`) resolves correctly for events emitted against
/// it.
pub async fn build_context<S: EventLog + ?Sized>(
    store: &S,
    execution_id: i64,
    workload: Value,
    current_step: Option<&str>,
) -> Result<Value, StoreError> {
    let events = store.fetch_by_execution(execution_id).await?;
    let mut step_results: Map<String, Value> = Map::new();
    for event in &events {
        if !matches!(event.event_type, EventType::ActionCompleted | EventType::Result) {
            continue;
        }
        let Some(name) = &event.node_name else { continue };
        // Loop-iteration events carry a `current_index`; the aggregated
        // loop result (no index) is the one exposed under the step name.
        if event.loop_meta.current_index.is_some() {
            continue;
        }
        if is_meaningful(&event.result) {
            step_results.insert(name.clone(), event.result.clone());
        }
    }

    let mut root = step_results;
    root.insert("workload".to_string(), workload.clone());
    root.insert("input".to_string(), workload.clone());
    root.insert("data".to_string(), workload);
    root.entry("env".to_string()).or_insert(Value::Object(Map::new()));
    root.entry("job".to_string()).or_insert(Value::Object(Map::new()));
    root.entry("keychain".to_string()).or_insert(Value::Object(Map::new()));

    let mut work = Map::new();
    if let Some(step) = current_step {
        work.insert("step_name".to_string(), Value::String(step.to_string()));
    }
    root.insert("work".to_string(), Value::Object(work));

    Ok(Value::Object(root))
}

fn is_meaningful(value: &Value) -> bool {
    if value.is_null() {
        return false;
    }
    if let Some(obj) = value.as_object() {
        if obj.get("skipped").and_then(Value::as_bool) == Some(true) {
            return false;
        }
        if obj.get("reason").and_then(Value::as_str) == Some("control_step") {
            return false;
        }
    }
    true
}

/// Stamp `work.step_name` onto an existing context tree (used when a
/// transition's `with` mapping has already been merged into the broker's
/// context and we are about to enqueue/emit against a specific step).
pub fn with_step_name(mut context: Value, step_name: &str) -> Value {
    if let Some(obj) = context.as_object_mut() {
        obj.insert(
            "work".to_string(),
            serde_json::json!({ "step_name": step_name }),
        );
    }
    context
}

/// Shallow-merge `with` onto `base` (object union; `with` wins on key
/// conflicts). Used to apply a transition's `with` mapping and a step's own
/// `with` mapping onto the ambient context before rendering task args.
pub fn merge_with(base: &Value, with: &Value) -> Value {
    match (base, with) {
        (Value::Object(base_map), Value::Object(with_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in with_map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => base.clone(),
    }
}

/// True if any historical event marks `execution_id` as a child execution
/// that reports up to a loop iteration — used by the dispatcher when an
/// `execution_complete` fires and the parent must be notified.
pub fn parent_of(events: &[Event]) -> Option<i64> {
    events.first().and_then(|e| e.parent_execution_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{EventLog, InMemoryStore};

    #[test]
    fn merge_with_overlays_with_onto_base_keys() {
        let base = serde_json::json!({"a": 1, "b": 2});
        let with = serde_json::json!({"b": 3, "c": 4});
        assert_eq!(merge_with(&base, &with), serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn merge_with_returns_base_unchanged_when_either_side_is_not_an_object() {
        let base = serde_json::json!({"a": 1});
        let with = serde_json::json!("not an object");
        assert_eq!(merge_with(&base, &with), base);
    }

    #[test]
    fn with_step_name_stamps_the_work_block() {
        let context = serde_json::json!({"workload": {}});
        let stamped = with_step_name(context, "a");
        assert_eq!(stamped["work"]["step_name"], serde_json::json!("a"));
    }

    #[test]
    fn is_meaningful_excludes_null_skipped_and_control_step_results() {
        assert!(!is_meaningful(&Value::Null));
        assert!(!is_meaningful(&serde_json::json!({"skipped": true})));
        assert!(!is_meaningful(&serde_json::json!({"reason": "control_step"})));
        assert!(is_meaningful(&serde_json::json!({"temp": 10})));
    }

    #[test]
    fn parent_of_reads_the_first_events_parent_execution_id() {
        let mut e = Event::new(2, EventType::ExecutionStart, "2:start".to_string());
        e.parent_execution_id = Some(1);
        assert_eq!(parent_of(&[e]), Some(1));
        assert_eq!(parent_of(&[]), None);
    }

    #[tokio::test]
    async fn build_context_indexes_completed_steps_by_name_and_skips_loop_iterations() {
        let store = InMemoryStore::new();
        let mut a = Event::new(1, EventType::ActionCompleted, "1:a".to_string());
        a.node_name = Some("a".to_string());
        a.result = serde_json::json!({"temp": 5});
        store.append(a).await.unwrap();

        let mut iter = Event::new(1, EventType::ActionCompleted, "1:b:0".to_string());
        iter.node_name = Some("b".to_string());
        iter.result = serde_json::json!({"temp": 1});
        iter.loop_meta.current_index = Some(0);
        store.append(iter).await.unwrap();

        let context = build_context(&store, 1, serde_json::json!({"city": "LDN"}), Some("c"))
            .await
            .unwrap();

        assert_eq!(context["a"], serde_json::json!({"temp": 5}));
        assert!(context.get("b").is_none(), "loop-iteration results must not shadow the aggregated one");
        assert_eq!(context["workload"], serde_json::json!({"city": "LDN"}));
        assert_eq!(context["work"]["step_name"], serde_json::json!("c"));
        assert_eq!(context["env"], serde_json::json!({}));
    }
}
