//! Executor Registry (C5): dispatches a task descriptor to the correct
//! task handler.
//!
//! The core knows the *set* of executor kinds (`TaskKind`, defined in
//! `flowline-contracts`) but nothing about their internals; each executor
//! is a collaborator obeying a uniform envelope contract. Concrete
//! executors (http, python, postgres, ...) are registered by the process
//! that hosts them — `flowline-worker` in this repo.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use flowline_contracts::{Step, TaskKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result envelope every executor must return. Executors never raise
/// across the process boundary; a panic is caught at the worker's outermost
/// boundary and converted into this shape with `status: error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        data: Value,
        #[serde(default)]
        meta: Value,
    },
    Error {
        error: String,
        #[serde(default)]
        traceback: Option<String>,
        #[serde(default)]
        meta: Value,
    },
}

impl ExecutionOutcome {
    pub fn success(data: Value) -> Self {
        ExecutionOutcome::Success {
            data,
            meta: Value::Null,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ExecutionOutcome::Error {
            error: error.into(),
            traceback: None,
            meta: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Project to the JSON shape workers attach to `action_completed` /
    /// `action_error` events.
    pub fn to_event_payload(&self) -> Value {
        match self {
            ExecutionOutcome::Success { data, .. } => data.clone(),
            ExecutionOutcome::Error { error, traceback, .. } => serde_json::json!({
                "error": error,
                "traceback": traceback,
            }),
        }
    }
}

/// Given `(task, context, rendered_args)`, produce an `ExecutionOutcome`.
/// Implementations must never panic for ordinary task failures — those are
/// `ExecutionOutcome::Error`; a panic is a programming bug in the executor.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, task: &Step, context: &Value, rendered_args: Value) -> ExecutionOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no executor registered for task kind {0:?}")]
    Unregistered(TaskKind),
}

/// Maps `TaskKind` to the executor that handles it. Registration happens
/// once at process startup; dispatch is a simple map lookup, never dynamic
/// reflection.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn is_registered(&self, kind: TaskKind) -> bool {
        self.executors.contains_key(&kind)
    }

    pub async fn dispatch(
        &self,
        task: &Step,
        context: &Value,
        rendered_args: Value,
    ) -> Result<ExecutionOutcome, RegistryError> {
        let executor = self
            .executors
            .get(&task.task_type)
            .ok_or(RegistryError::Unregistered(task.task_type))?;
        Ok(executor.execute(task, context, rendered_args).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Executor for Echo {
        async fn execute(&self, _task: &Step, _context: &Value, args: Value) -> ExecutionOutcome {
            ExecutionOutcome::success(args)
        }
    }

    fn http_step() -> Step {
        serde_json::from_value(serde_json::json!({
            "step": "a", "type": "http", "next": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_executor() {
        let mut registry = ExecutorRegistry::new();
        registry.register(TaskKind::Http, Arc::new(Echo));
        let outcome = registry
            .dispatch(&http_step(), &Value::Null, serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn dispatch_unregistered_kind_errors() {
        let registry = ExecutorRegistry::new();
        let err = registry
            .dispatch(&http_step(), &Value::Null, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unregistered(TaskKind::Http)));
    }
}
