//! Typed HTTP error: the only thing request handlers are allowed to
//! return on the error path. §7 requires the core never leak a raw
//! `anyhow::Error`/`StoreError` string to a response body; this maps
//! every lower-layer error to a status code and a short reason.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowline_core::{BrokerError, CatalogError, RegistryError, RenderError, StoreError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<RenderError> for ApiError {
    fn from(e: RenderError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::ExecutionNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::LeaseMismatch(_, _)) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Broker(BrokerError::CatalogMiss { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Broker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Catalog(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
