//! Errors shared by the Broker, Loop Coordinator, and Event Dispatcher.

use crate::catalog::CatalogError;
use crate::persistence::StoreError;
use crate::registry::RegistryError;
use crate::renderer::RenderError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("execution {0} has no persisted workload")]
    NoWorkload(i64),

    #[error("workload for execution {0} does not name a playbook path")]
    MissingPath(i64),

    #[error("catalog miss for playbook {path} (version {version:?})")]
    CatalogMiss { path: String, version: Option<String> },

    #[error("playbook {path} has no 'start' step")]
    MissingStartStep { path: String },

    #[error("step {0} referenced by a transition does not exist in the playbook")]
    UnknownStep(String),

    #[error("loop step {0} is missing its loop specification")]
    MissingLoopSpec(String),
}
