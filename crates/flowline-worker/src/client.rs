//! Thin HTTP client over the worker-facing surface of §6, with every call
//! gated by the adaptive concurrency semaphore (§4.10): a 503 feeds back
//! into the gate's AIMD decrease, any other response feeds a success.

use std::sync::Arc;
use std::time::Duration;

use flowline_contracts::{
    CatalogResourceRequest, CatalogResourceResponse, Event, FailRequest, HeartbeatRequest,
    LeaseRequest, LeaseResponse, PoolStatus, QueueJob,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::gate::AdaptiveGate;

pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    gate: Arc<AdaptiveGate>,
}

impl ServerClient {
    pub fn new(base_url: String, gate: Arc<AdaptiveGate>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            gate,
        }
    }

    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, WorkerError> {
        let permit = self.gate.acquire().await;
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let result = req.send().await;
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                permit.error().await;
                return Err(WorkerError::Http(e));
            }
        };

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(1.0);
            permit.overload(retry_after).await;
            return Err(WorkerError::ServerError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "pool saturated".to_string(),
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            permit.success().await;
            return Err(WorkerError::ServerError { status, body });
        }

        let parsed = response.json::<R>().await;
        permit.success().await;
        Ok(parsed?)
    }

    async fn call_no_body<R: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<R, WorkerError> {
        self.call::<(), R>(method, path, None).await
    }

    /// Like `call`, but for endpoints that reply `204 No Content` — never
    /// attempts to decode a response body.
    async fn call_unit<B: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), WorkerError> {
        let permit = self.gate.acquire().await;
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                permit.error().await;
                return Err(WorkerError::Http(e));
            }
        };

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(1.0);
            permit.overload(retry_after).await;
            return Err(WorkerError::ServerError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "pool saturated".to_string(),
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            permit.success().await;
            return Err(WorkerError::ServerError { status, body });
        }

        permit.success().await;
        Ok(())
    }

    pub async fn append_event(&self, event: &Event) -> Result<Event, WorkerError> {
        self.call(reqwest::Method::POST, "/events", Some(event)).await
    }

    pub async fn get_event(&self, execution_id: i64, event_id: i64) -> Result<Event, WorkerError> {
        self.call_no_body(
            reqwest::Method::GET,
            &format!("/events/{execution_id}/{event_id}"),
        )
        .await
    }

    pub async fn lease(&self, worker_id: &str, lease_seconds: u32) -> Result<Option<QueueJob>, WorkerError> {
        let req = LeaseRequest {
            worker_id: worker_id.to_string(),
            lease_seconds,
        };
        let resp: LeaseResponse = self.call(reqwest::Method::POST, "/queue/lease", Some(&req)).await?;
        Ok(resp.job)
    }

    pub async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extend_seconds: Option<u32>,
    ) -> Result<(), WorkerError> {
        let req = HeartbeatRequest {
            worker_id: worker_id.to_string(),
            extend_seconds,
        };
        self.call_unit(
            reqwest::Method::POST,
            &format!("/queue/{job_id}/heartbeat"),
            Some(&req),
        )
        .await
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<(), WorkerError> {
        self.call_unit::<()>(reqwest::Method::POST, &format!("/queue/{job_id}/complete"), None)
            .await
    }

    pub async fn fail(&self, job_id: Uuid, req: &FailRequest) -> Result<(), WorkerError> {
        self.call::<_, serde_json::Value>(reqwest::Method::POST, &format!("/queue/{job_id}/fail"), Some(req))
            .await
            .map(|_| ())
    }

    pub async fn fetch_resource(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<CatalogResourceResponse, WorkerError> {
        let req = CatalogResourceRequest {
            path: path.to_string(),
            version: version.map(str::to_string),
        };
        self.call(reqwest::Method::POST, "/catalog/resource", Some(&req)).await
    }

    pub async fn pool_status(&self) -> Result<PoolStatus, WorkerError> {
        self.call_no_body(reqwest::Method::GET, "/pool/status").await
    }
}
