//! Event Dispatcher (C9): routes a freshly persisted event to the Broker
//! according to a closed routing table (§4.9). The dispatcher owns no
//! state beyond the table itself — it exists so the API layer has one
//! call (`dispatch`) to make after every `append`, instead of re-deriving
//! which triggers matter at each call site.

use std::sync::Arc;

use flowline_contracts::{Event, EventType};

use crate::catalog::CatalogClient;
use crate::persistence::{EventLog, WorkQueue};
use crate::renderer::Renderer;

use super::broker::{Broker, BrokerConfig};
use super::error::BrokerError;

/// Event types that feed the Broker. Every other event type is a pure
/// progress marker the dispatcher drops on the floor.
fn routes_to_broker(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::ExecutionStart
            | EventType::ActionCompleted
            | EventType::StepResult
            | EventType::Result
            | EventType::ExecutionComplete
    )
}

pub struct EventDispatcher<S> {
    broker: Broker<S>,
}

impl<S: EventLog + WorkQueue> EventDispatcher<S> {
    pub fn new(store: Arc<S>, catalog: Arc<dyn CatalogClient>, renderer: Arc<Renderer>) -> Self {
        Self {
            broker: Broker::new(store, catalog, renderer),
        }
    }

    pub fn with_config(
        store: Arc<S>,
        catalog: Arc<dyn CatalogClient>,
        renderer: Arc<Renderer>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            broker: Broker::with_config(store, catalog, renderer, config),
        }
    }

    /// Route `event` to the Broker if its type is in the closed table;
    /// otherwise a no-op. Call this once after every successful
    /// `EventLog::append`.
    pub async fn dispatch(&self, event: &Event) -> Result<(), BrokerError> {
        if !routes_to_broker(event.event_type) {
            return Ok(());
        }
        self.broker
            .evaluate_execution(event.execution_id, event.event_type, event)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::persistence::InMemoryStore;
    use flowline_contracts::EventStatus;
    use serde_json::json;
    use std::time::Duration;

    const LINEAR: &str = r#"
path: p1
version: 0.1.0
workflow:
  - step: start
    type: http
    next:
      - step: end
  - step: end
    type: transfer
    result:
      ok: true
    next: []
"#;

    #[tokio::test]
    async fn step_started_is_ignored_by_the_routing_table() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.put("p1", "0.1.0", LINEAR.to_string()).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = EventDispatcher::with_config(
            store.clone(),
            catalog,
            Arc::new(Renderer::new()),
            BrokerConfig {
                evaluation_delay: Duration::ZERO,
            },
        );

        let mut start = Event::new(1, EventType::ExecutionStart, "1");
        start.status = EventStatus::Running;
        start.context = json!({"path": "p1", "version": "0.1.0", "workload": {}});
        let start = store.append(start).await.unwrap();
        dispatcher.dispatch(&start).await.unwrap();

        assert_eq!(store.job_count(), 0);

        let mut progress = Event::new(1, EventType::StepStarted, "1:start");
        progress.node_name = Some("start".to_string());
        let progress = store.append(progress).await.unwrap();
        dispatcher.dispatch(&progress).await.unwrap();

        // Still zero jobs: step_started never reaches the broker, and the
        // execution was already dispatched off of execution_start.
        assert_eq!(store.job_count(), 0);
        let events = store.fetch_by_execution(1).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::ExecutionComplete));
    }
}
