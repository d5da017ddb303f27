//! Worker Protocol (C10): lease → execute → complete/fail loop, run as N
//! concurrent tasks per process (§4.10, step 1-5).

use std::sync::Arc;
use std::time::Duration;

use flowline_contracts::{Event, EventStatus, EventType, FailRequest, LoopMeta, NodeType, QueueJob, Step};
use flowline_core::{ExecutorRegistry, Renderer};
use serde_json::Value;

use crate::client::ServerClient;
use crate::config::WorkerConfig;
use crate::{aggregator, error::WorkerError};

pub struct WorkerLoop {
    client: Arc<ServerClient>,
    registry: Arc<ExecutorRegistry>,
    renderer: Arc<Renderer>,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        client: Arc<ServerClient>,
        registry: Arc<ExecutorRegistry>,
        renderer: Arc<Renderer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            client,
            registry,
            renderer,
            config,
        }
    }

    /// Run `concurrency` lease loops until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut tasks = Vec::new();
        for slot in 0..self.config.concurrency {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                this.run_slot(slot, &mut shutdown).await;
            }));
        }
        shutdown.changed().await.ok();
        for task in tasks {
            task.abort();
        }
    }

    async fn run_slot(&self, slot: usize, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self
                .client
                .lease(&self.config.worker_id, self.config.lease_seconds)
                .await
            {
                Ok(Some(job)) => {
                    if let Err(e) = self.handle_job(job).await {
                        tracing::error!(slot, error = %e, "worker: job handling failed");
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_idle_ms)).await;
                }
                Err(e) => {
                    tracing::warn!(slot, error = %e, "worker: lease call failed");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_idle_ms)).await;
                }
            }
        }
    }

    async fn handle_job(&self, job: QueueJob) -> Result<(), WorkerError> {
        if is_aggregation_job(&job.action) {
            return self.handle_aggregation_job(job).await;
        }
        self.handle_step_job(job).await
    }

    async fn handle_aggregation_job(&self, job: QueueJob) -> Result<(), WorkerError> {
        match aggregator::run(&self.client, &job).await {
            Ok(()) => self.client.complete(job.id).await,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "aggregator job failed");
                self.client
                    .fail(
                        job.id,
                        &FailRequest {
                            retry_delay_seconds: None,
                            retry: None,
                            error: Some(e.to_string()),
                        },
                    )
                    .await
            }
        }
    }

    async fn handle_step_job(&self, job: QueueJob) -> Result<(), WorkerError> {
        let step: Step = serde_json::from_value(job.action.clone())?;
        let loop_meta = loop_meta_from_context(&job.context);
        let metadata = self.worker_metadata();

        let heartbeat = self.spawn_heartbeat(job.id);

        let mut started = Event::new(job.execution_id, EventType::ActionStarted, job.node_id.clone());
        started.node_name = Some(step.step.clone());
        started.node_type = Some(NodeType::Task);
        started.status = EventStatus::Running;
        started.context = job.context.clone();
        started.loop_meta = loop_meta.clone();
        started.metadata = metadata.clone();
        self.client.append_event(&started).await?;

        let rendered_args = self.build_rendered_args(&step, &job.context);
        let rendered_args = match rendered_args {
            Ok(v) => v,
            Err(e) => {
                heartbeat.abort();
                return self
                    .report_failure(&job, &step, &loop_meta, &metadata, e.to_string())
                    .await;
            }
        };

        let outcome = self.registry.dispatch(&step, &job.context, rendered_args).await;
        heartbeat.abort();

        match outcome {
            Ok(outcome) if outcome.is_success() => {
                let data = outcome.to_event_payload();

                let mut completed =
                    Event::new(job.execution_id, EventType::ActionCompleted, job.node_id.clone());
                completed.node_name = Some(step.step.clone());
                completed.node_type = Some(NodeType::Task);
                completed.status = EventStatus::Completed;
                completed.result = data.clone();
                completed.loop_meta = loop_meta.clone();
                completed.metadata = metadata.clone();
                self.client.append_event(&completed).await?;

                let mut step_result =
                    Event::new(job.execution_id, EventType::StepResult, job.node_id.clone());
                step_result.node_name = Some(step.step.clone());
                step_result.node_type = Some(NodeType::Step);
                step_result.status = EventStatus::Completed;
                step_result.result = data;
                step_result.loop_meta = loop_meta;
                step_result.metadata = metadata;
                self.client.append_event(&step_result).await?;

                self.client.complete(job.id).await
            }
            Ok(outcome) => {
                let message = match outcome {
                    flowline_core::ExecutionOutcome::Error { error, .. } => error,
                    _ => unreachable!("matched success branch above"),
                };
                self.report_failure(&job, &step, &loop_meta, &metadata, message).await
            }
            Err(registry_err) => {
                self.report_failure(&job, &step, &loop_meta, &metadata, registry_err.to_string())
                    .await
            }
        }
    }

    async fn report_failure(
        &self,
        job: &QueueJob,
        step: &Step,
        loop_meta: &LoopMeta,
        metadata: &Value,
        message: String,
    ) -> Result<(), WorkerError> {
        let mut error_event = Event::new(job.execution_id, EventType::ActionError, job.node_id.clone());
        error_event.node_name = Some(step.step.clone());
        error_event.node_type = Some(NodeType::Task);
        error_event.status = EventStatus::Failed;
        error_event.error = Some(message.clone());
        error_event.loop_meta = loop_meta.clone();
        error_event.metadata = metadata.clone();
        self.client.append_event(&error_event).await?;

        self.client
            .fail(
                job.id,
                &FailRequest {
                    retry_delay_seconds: None,
                    retry: None,
                    error: Some(message),
                },
            )
            .await
    }

    /// Render every templated field of a step's task configuration against
    /// the job's context tree in one pass, producing the `rendered_args`
    /// bag executors read from (§4.4: the Renderer is used to render
    /// task args, distinct from `task`'s raw, unrendered fields).
    fn build_rendered_args(
        &self,
        step: &Step,
        context: &Value,
    ) -> Result<Value, flowline_core::RenderError> {
        let raw = serde_json::json!({
            "url": step.url,
            "endpoint": step.endpoint,
            "method": step.method,
            "headers": step.headers,
            "params": step.params,
            "data": step.data,
            "payload": step.payload,
            "with": step.with,
            "sql": step.sql,
            "resource_path": step.resource_path,
        });
        let rendered = self.renderer.render_value(&raw, context)?;
        // Flatten `with` into the top level too, so executors can read
        // either `rendered_args.with.key` or `rendered_args.key`.
        let mut merged = rendered.clone();
        if let (Some(merged_obj), Some(with_obj)) = (merged.as_object_mut(), rendered.get("with").and_then(Value::as_object)) {
            for (k, v) in with_obj {
                merged_obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(merged)
    }

    /// `{pool, runtime, pid, hostname, worker_id}`, stamped onto every
    /// event this worker emits before appending it (§4.10 step 5).
    fn worker_metadata(&self) -> Value {
        serde_json::json!({
            "pool": self.config.pool_name,
            "runtime": self.config.runtime,
            "pid": std::process::id(),
            "hostname": crate::config::hostname(),
            "worker_id": self.config.worker_id,
        })
    }

    fn spawn_heartbeat(&self, job_id: uuid::Uuid) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let worker_id = self.config.worker_id.clone();
        let interval = Duration::from_secs(self.config.heartbeat_interval_seconds);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = client.heartbeat(job_id, &worker_id, None).await {
                    tracing::debug!(job_id = %job_id, error = %e, "heartbeat failed");
                }
            }
        })
    }
}

fn is_aggregation_job(action: &Value) -> bool {
    action.get("type").and_then(Value::as_str) == Some("result_aggregation")
}

fn loop_meta_from_context(context: &Value) -> LoopMeta {
    let Some(loop_obj) = context.get("_loop") else {
        return LoopMeta::default();
    };
    LoopMeta {
        loop_id: loop_obj.get("loop_id").and_then(Value::as_str).map(str::to_string),
        loop_name: loop_obj.get("loop_name").and_then(Value::as_str).map(str::to_string),
        iterator: loop_obj.get("iterator").and_then(Value::as_str).map(str::to_string),
        current_index: loop_obj.get("current_index").and_then(Value::as_i64),
        current_item: loop_obj.get("current_item").cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AdaptiveGate;
    use serde_json::json;

    fn loop_context() -> Value {
        json!({
            "city": "LDN",
            "_loop": {
                "loop_id": "1:c",
                "loop_name": "c",
                "iterator": "city",
                "current_index": 2,
                "current_item": "LDN",
            }
        })
    }

    #[test]
    fn is_aggregation_job_matches_only_the_result_aggregation_tag() {
        assert!(is_aggregation_job(&json!({"type": "result_aggregation"})));
        assert!(!is_aggregation_job(&json!({"type": "http"})));
        assert!(!is_aggregation_job(&json!({})));
    }

    #[test]
    fn loop_meta_from_context_extracts_the_underscore_loop_block() {
        let meta = loop_meta_from_context(&loop_context());
        assert_eq!(meta.loop_name.as_deref(), Some("c"));
        assert_eq!(meta.current_index, Some(2));
        assert_eq!(meta.current_item, Some(json!("LDN")));
    }

    #[test]
    fn loop_meta_from_context_defaults_when_no_loop_block_present() {
        let meta = loop_meta_from_context(&json!({"x": 1}));
        assert_eq!(meta, LoopMeta::default());
    }

    fn worker_loop() -> WorkerLoop {
        let gate = Arc::new(AdaptiveGate::new(crate::config::GateConfig::default()));
        let client = Arc::new(ServerClient::new("http://127.0.0.1:0".to_string(), gate));
        WorkerLoop::new(
            client,
            Arc::new(ExecutorRegistry::new()),
            Arc::new(Renderer::new()),
            WorkerConfig::default(),
        )
    }

    #[test]
    fn build_rendered_args_renders_templated_fields_and_flattens_with() {
        let step: Step = serde_json::from_value(json!({
            "step": "a",
            "type": "http",
            "url": "https://example.com/{{ workload.id }}",
            "with": {"greeting": "{{ workload.name }}"},
            "next": []
        }))
        .unwrap();
        let context = json!({"workload": {"id": "42", "name": "ada"}});

        let rendered = worker_loop().build_rendered_args(&step, &context).unwrap();
        assert_eq!(rendered["url"], json!("https://example.com/42"));
        assert_eq!(rendered["with"]["greeting"], json!("ada"));
        // Flattened onto the top level too.
        assert_eq!(rendered["greeting"], json!("ada"));
    }

    #[test]
    fn worker_metadata_carries_pool_runtime_pid_hostname_and_worker_id() {
        let worker = worker_loop();
        let metadata = worker.worker_metadata();
        assert_eq!(metadata["pool"], json!(worker.config.pool_name));
        assert_eq!(metadata["runtime"], json!(worker.config.runtime));
        assert_eq!(metadata["pid"], json!(std::process::id()));
        assert_eq!(metadata["worker_id"], json!(worker.config.worker_id));
        assert!(metadata["hostname"].is_string());
    }

    #[test]
    fn build_rendered_args_propagates_a_render_error() {
        let step: Step = serde_json::from_value(json!({
            "step": "a",
            "type": "http",
            "url": "{{ workload.missing }}",
            "next": []
        }))
        .unwrap();
        let context = json!({"workload": {}});

        assert!(worker_loop().build_rendered_args(&step, &context).is_err());
    }
}
