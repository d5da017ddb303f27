//! Broker / Evaluator (C8): a pure function of `(execution_id,
//! triggering_event)` that reads the event log, computes the next
//! actionable step, and enqueues it. See §4.8.

use std::sync::Arc;
use std::time::Duration;

use flowline_contracts::{
    Event, EventStatus, EventType, NodeType, Playbook, Step, TaskKind,
};
use serde_json::{json, Value};

use crate::catalog::CatalogClient;
use crate::persistence::{EventLog, WorkQueue};
use crate::renderer::Renderer;

use super::context::{build_context, with_step_name};
use super::error::BrokerError;
use super::loop_coordinator::LoopCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Failed,
    Completed,
    InProgress,
    Initial,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Absorbs event storms during loop fan-out (§5). Zero in tests.
    pub evaluation_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            evaluation_delay: Duration::from_millis(200),
        }
    }
}

pub struct Broker<S> {
    store: Arc<S>,
    catalog: Arc<dyn CatalogClient>,
    renderer: Arc<Renderer>,
    loop_coordinator: LoopCoordinator,
    config: BrokerConfig,
}

impl<S: EventLog + WorkQueue> Broker<S> {
    pub fn new(store: Arc<S>, catalog: Arc<dyn CatalogClient>, renderer: Arc<Renderer>) -> Self {
        Self::with_config(store, catalog, renderer, BrokerConfig::default())
    }

    pub fn with_config(
        store: Arc<S>,
        catalog: Arc<dyn CatalogClient>,
        renderer: Arc<Renderer>,
        config: BrokerConfig,
    ) -> Self {
        let loop_coordinator = LoopCoordinator::new(renderer.clone());
        Self {
            store,
            catalog,
            renderer,
            loop_coordinator,
            config,
        }
    }

    /// Single entry point: §4.8. Safe to call redundantly — every enqueue
    /// and terminal emission is guarded by an idempotency check against the
    /// event log and queue.
    #[tracing::instrument(skip(self, trigger_event), fields(event_type = ?trigger_event_type))]
    pub async fn evaluate_execution(
        &self,
        execution_id: i64,
        trigger_event_type: EventType,
        trigger_event: &Event,
    ) -> Result<(), BrokerError> {
        if !self.config.evaluation_delay.is_zero() {
            tokio::time::sleep(self.config.evaluation_delay).await;
        }

        if matches!(trigger_event_type, EventType::StepStarted) {
            return Ok(());
        }

        let events = self.store.fetch_by_execution(execution_id).await?;
        match self.classify(&events).await? {
            ExecutionState::Failed | ExecutionState::Completed => Ok(()),
            ExecutionState::Initial => self.initial_dispatch(execution_id).await,
            ExecutionState::InProgress => {
                if matches!(
                    trigger_event_type,
                    EventType::ActionCompleted | EventType::StepResult
                ) {
                    self.advance_completed_steps(execution_id, &events).await?;
                }
                if matches!(
                    trigger_event_type,
                    EventType::ExecutionComplete | EventType::ActionCompleted
                ) {
                    self.check_loops(execution_id).await?;
                }
                let _ = trigger_event;
                Ok(())
            }
        }
    }

    async fn initial_dispatch(&self, execution_id: i64) -> Result<(), BrokerError> {
        let raw = self
            .store
            .get_workload(execution_id)
            .await?
            .ok_or(BrokerError::NoWorkload(execution_id))?;
        let path = raw
            .get("path")
            .and_then(Value::as_str)
            .ok_or(BrokerError::MissingPath(execution_id))?
            .to_string();
        let version = raw.get("version").and_then(Value::as_str).map(str::to_string);
        let workload = raw.get("workload").cloned().unwrap_or(Value::Null);

        let Some((_, playbook)) = self.catalog.fetch_entry(&path, version.as_deref()).await? else {
            self.emit_catalog_miss(execution_id, &path, version.as_deref()).await?;
            return Err(BrokerError::CatalogMiss { path, version });
        };

        let start = playbook
            .start_step()
            .ok_or_else(|| BrokerError::MissingStartStep { path: path.clone() })?;

        let context = build_context(
            self.store.as_ref(),
            execution_id,
            workload,
            Some(&start.step),
        )
        .await?;

        let chosen = self.first_matching_transition(start, &context)?;
        match chosen {
            Some((target, with)) => {
                let merged = super::context::merge_with(&context, &with);
                self.dispatch_step(execution_id, &playbook, target, merged).await
            }
            None => Ok(()),
        }
    }

    async fn advance_completed_steps(
        &self,
        execution_id: i64,
        events: &[Event],
    ) -> Result<(), BrokerError> {
        let completed_steps = steps_awaiting_completion_marker(events);
        if completed_steps.is_empty() {
            return Ok(());
        }

        let raw = self
            .store
            .get_workload(execution_id)
            .await?
            .ok_or(BrokerError::NoWorkload(execution_id))?;
        let path = raw
            .get("path")
            .and_then(Value::as_str)
            .ok_or(BrokerError::MissingPath(execution_id))?
            .to_string();
        let version = raw.get("version").and_then(Value::as_str).map(str::to_string);
        let workload = raw.get("workload").cloned().unwrap_or(Value::Null);
        let Some((_, playbook)) = self.catalog.fetch_entry(&path, version.as_deref()).await? else {
            self.emit_catalog_miss(execution_id, &path, version.as_deref()).await?;
            return Err(BrokerError::CatalogMiss { path, version });
        };

        for step_name in completed_steps {
            let Some(step) = playbook.step_by_name(&step_name) else {
                continue;
            };

            let mut completed = Event::new(
                execution_id,
                EventType::StepCompleted,
                format!("{execution_id}:{step_name}"),
            );
            completed.node_name = Some(step_name.clone());
            completed.status = EventStatus::Completed;
            self.store.append(completed).await?;

            let context =
                build_context(self.store.as_ref(), execution_id, workload.clone(), Some(&step_name))
                    .await?;

            match self.first_matching_transition(step, &context)? {
                Some((target, with)) => {
                    let merged = super::context::merge_with(&context, &with);
                    self.dispatch_step(execution_id, &playbook, target, merged).await?;
                }
                None => {
                    self.finalize_result_only(execution_id, step, &context).await?;
                }
            }
        }
        Ok(())
    }

    async fn check_loops(&self, execution_id: i64) -> Result<(), BrokerError> {
        let completions = self
            .loop_coordinator
            .check_and_finalize(self.store.as_ref(), execution_id)
            .await?;
        if completions.is_empty() {
            return Ok(());
        }

        let raw = self
            .store
            .get_workload(execution_id)
            .await?
            .ok_or(BrokerError::NoWorkload(execution_id))?;
        let path = raw
            .get("path")
            .and_then(Value::as_str)
            .ok_or(BrokerError::MissingPath(execution_id))?
            .to_string();
        let version = raw.get("version").and_then(Value::as_str).map(str::to_string);
        let workload = raw.get("workload").cloned().unwrap_or(Value::Null);
        let Some((_, playbook)) = self.catalog.fetch_entry(&path, version.as_deref()).await? else {
            return Ok(());
        };

        for completion in completions {
            let Some(step) = playbook.step_by_name(&completion.step_name) else {
                continue;
            };
            let mut context = build_context(
                self.store.as_ref(),
                execution_id,
                workload.clone(),
                Some(&completion.step_name),
            )
            .await?;
            if let Some(obj) = context.as_object_mut() {
                obj.insert(completion.step_name.clone(), completion.aggregate);
            }

            match self.first_matching_transition(step, &context)? {
                Some((target, with)) => {
                    let merged = super::context::merge_with(&context, &with);
                    self.dispatch_step(execution_id, &playbook, target, merged).await?;
                }
                None => {
                    self.finalize_result_only(execution_id, step, &context).await?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate `step.next[]` in order; the first entry with no `when` or a
    /// truthy `when` wins. Returns the target step name and its `with`.
    fn first_matching_transition<'a>(
        &self,
        step: &'a Step,
        context: &Value,
    ) -> Result<Option<(&'a str, Value)>, BrokerError> {
        for transition in &step.next {
            let matches = match &transition.when {
                Some(expr) => self.renderer.eval_condition(expr, context),
                None => true,
            };
            if matches {
                return Ok(Some((transition.step.as_str(), transition.with.clone())));
            }
        }
        Ok(None)
    }

    /// Resolve `target_step_name` against the playbook and either enqueue
    /// it (expanding a loop if it has one) or finalize it as a result-only
    /// step.
    async fn dispatch_step(
        &self,
        execution_id: i64,
        playbook: &Playbook,
        target_step_name: &str,
        context: Value,
    ) -> Result<(), BrokerError> {
        let step = playbook
            .step_by_name(target_step_name)
            .ok_or_else(|| BrokerError::UnknownStep(target_step_name.to_string()))?;

        let context = with_step_name(context, &step.step);

        if !step.is_actionable() {
            return self.finalize_result_only(execution_id, step, &context).await;
        }

        let mut started = Event::new(
            execution_id,
            EventType::StepStarted,
            format!("{execution_id}:{}", step.step),
        );
        started.node_name = Some(step.step.clone());
        started.status = EventStatus::Running;
        self.store.append(started).await?;

        if step.r#loop.is_some() {
            self.loop_coordinator
                .expand(self.store.as_ref(), execution_id, step, &context)
                .await?;
            return Ok(());
        }

        let node_id = format!("{execution_id}:{}", step.step);
        let max_attempts = step_max_attempts(step);
        let action = serde_json::to_value(step).unwrap_or(Value::Null);
        self.store
            .enqueue(
                execution_id,
                &node_id,
                action,
                context,
                0,
                max_attempts,
                chrono::Utc::now(),
            )
            .await?;
        Ok(())
    }

    /// A non-actionable step (or one with no further transition): render
    /// its `result` mapping and emit `execution_complete`, or — if it has
    /// no `result` mapping — just a `step_completed` marker.
    async fn finalize_result_only(
        &self,
        execution_id: i64,
        step: &Step,
        context: &Value,
    ) -> Result<(), BrokerError> {
        if step.result.is_null() {
            let mut marker = Event::new(
                execution_id,
                EventType::StepCompleted,
                format!("{execution_id}:{}", step.step),
            );
            marker.node_name = Some(step.step.clone());
            marker.status = EventStatus::Completed;
            self.store.append(marker).await?;
            return Ok(());
        }

        let rendered = self.renderer.render_value(&step.result, context)?;

        let mut complete = Event::new(execution_id, EventType::ExecutionComplete, format!("{execution_id}"));
        complete.node_name = Some(step.step.clone());
        complete.node_type = Some(NodeType::Playbook);
        complete.status = EventStatus::Completed;
        complete.result = rendered;
        self.store.append(complete).await?;
        Ok(())
    }

    async fn emit_catalog_miss(
        &self,
        execution_id: i64,
        path: &str,
        version: Option<&str>,
    ) -> Result<(), BrokerError> {
        let mut failure = Event::new(execution_id, EventType::ExecutionComplete, format!("{execution_id}"));
        failure.node_type = Some(NodeType::Playbook);
        failure.status = EventStatus::Failed;
        failure.error = Some(format!(
            "catalog miss for playbook {path} (version {version:?})"
        ));
        self.store.append(failure).await?;
        Ok(())
    }

    /// §4.8's state classification. `in_progress` is reached either by an
    /// `action_completed` event or by a dispatched node still having a
    /// queued/leased job — the latter covers the window right after
    /// `initial_dispatch`/`dispatch_step` append a `step_started` event
    /// (which carries no `event_id`, so append-time dedup never fires) but
    /// before its action completes: without this check, a re-entrant
    /// `evaluate_execution` (e.g. a duplicate `execution_start` submission)
    /// would misclassify the execution as `Initial` and re-run
    /// `initial_dispatch`, appending a second `step_started` event for the
    /// same node.
    async fn classify(&self, events: &[Event]) -> Result<ExecutionState, BrokerError> {
        let failed = events.iter().any(|e| {
            e.event_type == EventType::StepFailedTerminal
                || (e.event_type == EventType::ExecutionComplete && e.status == EventStatus::Failed)
        });
        if failed {
            return Ok(ExecutionState::Failed);
        }

        if events.iter().any(|e| e.event_type == EventType::ExecutionComplete) {
            return Ok(ExecutionState::Completed);
        }

        if events.iter().any(|e| e.event_type == EventType::ActionCompleted) {
            return Ok(ExecutionState::InProgress);
        }

        let mut checked = std::collections::HashSet::new();
        for event in events {
            if event.event_type != EventType::StepStarted {
                continue;
            }
            if !checked.insert(event.node_id.clone()) {
                continue;
            }
            if self.store.has_in_flight(event.execution_id, &event.node_id).await? {
                return Ok(ExecutionState::InProgress);
            }
        }

        Ok(ExecutionState::Initial)
    }
}

/// Steps with an `action_completed` but no `step_completed` marker yet,
/// excluding loop iterations (identified by a set `current_index`) — those
/// are handled by the Loop Coordinator instead.
fn steps_awaiting_completion_marker(events: &[Event]) -> Vec<String> {
    let mut completed: Vec<String> = Vec::new();
    let mut marked: std::collections::HashSet<String> = std::collections::HashSet::new();

    for event in events {
        match event.event_type {
            EventType::ActionCompleted if event.loop_meta.current_index.is_none() => {
                if let Some(name) = &event.node_name {
                    if !completed.contains(name) {
                        completed.push(name.clone());
                    }
                }
            }
            EventType::StepCompleted => {
                if let Some(name) = &event.node_name {
                    marked.insert(name.clone());
                }
            }
            _ => {}
        }
    }

    completed.into_iter().filter(|s| !marked.contains(s)).collect()
}

fn step_max_attempts(step: &Step) -> i32 {
    let cfg: Option<flowline_contracts::RetryConfig> = step.retry.clone().map(Into::into).flatten();
    cfg.map(|c| c.max_attempts as i32).unwrap_or(1)
}

#[allow(dead_code)]
fn task_kind_requires_code(kind: TaskKind) -> bool {
    matches!(kind, TaskKind::Python)
}
