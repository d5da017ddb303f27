//! Worker-side error type. Library-shaped (`thiserror`), matching the
//! core's own `StoreError`/`BrokerError` convention; `main.rs` is the only
//! place that reaches for `anyhow`.

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("server request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    ServerError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("could not decode job action as a step or aggregation payload: {0}")]
    Decode(#[from] serde_json::Error),
}
