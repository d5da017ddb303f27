//! `http` executor: issues one request per task invocation. Best-effort —
//! a production deployment is expected to bring its own client with retry
//! policy, connection pooling tuned to the target, auth, etc.

use std::time::Duration;

use async_trait::async_trait;
use flowline_contracts::Step;
use flowline_core::{ExecutionOutcome, Executor};
use reqwest::Method;
use serde_json::Value;

pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
        }
    }
}

/// Prefer the rendered (templated) value over the step's raw, unrendered
/// fields, and `url` over the legacy `endpoint` alias.
fn resolve_url<'a>(task: &'a Step, rendered_args: &'a Value) -> Option<&'a str> {
    rendered_args
        .get("url")
        .or_else(|| rendered_args.get("endpoint"))
        .and_then(Value::as_str)
        .or(task.url.as_deref())
        .or(task.endpoint.as_deref())
}

fn resolve_method(task: &Step, rendered_args: &Value) -> Result<Method, String> {
    let method = rendered_args
        .get("method")
        .and_then(Value::as_str)
        .or(task.method.as_deref())
        .unwrap_or("GET");
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid http method {method}"))
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, task: &Step, _context: &Value, rendered_args: Value) -> ExecutionOutcome {
        let Some(url) = resolve_url(task, &rendered_args) else {
            return ExecutionOutcome::error("http step has no url/endpoint");
        };

        let method = match resolve_method(task, &rendered_args) {
            Ok(m) => m,
            Err(e) => return ExecutionOutcome::error(e),
        };

        let mut req = self.client.request(method, url);

        if let Some(headers) = rendered_args.get("headers").and_then(Value::as_object) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    req = req.header(k.as_str(), v);
                }
            }
        }
        if let Some(params) = rendered_args.get("params").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = params
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect();
            req = req.query(&pairs);
        }
        let body = rendered_args
            .get("data")
            .or_else(|| rendered_args.get("payload"))
            .cloned();
        if let Some(body) = body {
            req = req.json(&body);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.json::<Value>().await.unwrap_or(Value::Null);
                if status.is_success() {
                    ExecutionOutcome::success(serde_json::json!({
                        "status_code": status.as_u16(),
                        "body": body,
                    }))
                } else {
                    ExecutionOutcome::error(format!("http {status}"))
                }
            }
            Err(e) => ExecutionOutcome::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(body: serde_json::Value) -> Step {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn resolve_url_prefers_rendered_url_over_endpoint_and_raw_fields() {
        let task = step(json!({
            "step": "a", "type": "http", "url": "https://raw/url",
            "endpoint": "https://raw/endpoint", "next": []
        }));
        let rendered = json!({"url": "https://rendered/url", "endpoint": "https://rendered/endpoint"});
        assert_eq!(resolve_url(&task, &rendered), Some("https://rendered/url"));
    }

    #[test]
    fn resolve_url_falls_back_to_the_raw_step_fields_when_nothing_rendered() {
        let task = step(json!({"step": "a", "type": "http", "endpoint": "https://raw/endpoint", "next": []}));
        assert_eq!(resolve_url(&task, &json!({})), Some("https://raw/endpoint"));
    }

    #[test]
    fn resolve_url_is_none_when_no_source_has_one() {
        let task = step(json!({"step": "a", "type": "http", "next": []}));
        assert_eq!(resolve_url(&task, &json!({})), None);
    }

    #[test]
    fn resolve_method_defaults_to_get() {
        let task = step(json!({"step": "a", "type": "http", "next": []}));
        assert_eq!(resolve_method(&task, &json!({})).unwrap(), Method::GET);
    }

    #[test]
    fn resolve_method_is_case_insensitive_and_prefers_rendered_over_raw() {
        let task = step(json!({"step": "a", "type": "http", "method": "get", "next": []}));
        let method = resolve_method(&task, &json!({"method": "post"})).unwrap();
        assert_eq!(method, Method::POST);
    }

    #[test]
    fn resolve_method_rejects_garbage() {
        let task = step(json!({"step": "a", "type": "http", "next": []}));
        assert!(resolve_method(&task, &json!({"method": "not a method"})).is_err());
    }
}
