//! `secrets` executor: plain env-var passthrough. The real secrets
//! backend (vault integration, keychain resolution) is explicitly out of
//! scope (§1); this exists only so a playbook step of type `secrets`
//! exercises the worker protocol end to end.

use async_trait::async_trait;
use flowline_contracts::Step;
use flowline_core::{ExecutionOutcome, Executor};
use serde_json::Value;

pub struct SecretsExecutor;

impl SecretsExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for SecretsExecutor {
    async fn execute(&self, _task: &Step, _context: &Value, rendered_args: Value) -> ExecutionOutcome {
        let keys = rendered_args
            .get("keys")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut resolved = serde_json::Map::new();
        let mut missing = Vec::new();
        for key in &keys {
            let Some(key) = key.as_str() else { continue };
            match std::env::var(key) {
                Ok(value) => {
                    resolved.insert(key.to_string(), Value::String(value));
                }
                Err(_) => missing.push(key.to_string()),
            }
        }

        if !missing.is_empty() {
            return ExecutionOutcome::error(format!("missing secrets: {}", missing.join(", ")));
        }
        ExecutionOutcome::success(Value::Object(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_every_requested_key_present_in_the_environment() {
        std::env::set_var("FLOWLINE_TEST_SECRET_A", "shh");
        let executor = SecretsExecutor::new();
        let step: Step = serde_json::from_value(json!({
            "step": "a", "type": "secrets", "next": []
        }))
        .unwrap();

        let outcome = executor
            .execute(&step, &Value::Null, json!({"keys": ["FLOWLINE_TEST_SECRET_A"]}))
            .await;

        match outcome {
            ExecutionOutcome::Success { data, .. } => {
                assert_eq!(data["FLOWLINE_TEST_SECRET_A"], json!("shh"));
            }
            ExecutionOutcome::Error { error, .. } => panic!("expected success, got error: {error}"),
        }
        std::env::remove_var("FLOWLINE_TEST_SECRET_A");
    }

    #[tokio::test]
    async fn a_missing_key_fails_the_whole_step() {
        let executor = SecretsExecutor::new();
        let step: Step = serde_json::from_value(json!({
            "step": "a", "type": "secrets", "next": []
        }))
        .unwrap();

        let outcome = executor
            .execute(
                &step,
                &Value::Null,
                json!({"keys": ["FLOWLINE_TEST_SECRET_DOES_NOT_EXIST"]}),
            )
            .await;

        match outcome {
            ExecutionOutcome::Error { error, .. } => {
                assert!(error.contains("FLOWLINE_TEST_SECRET_DOES_NOT_EXIST"));
            }
            ExecutionOutcome::Success { .. } => panic!("expected a missing-secret error"),
        }
    }
}
