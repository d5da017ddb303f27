//! Minimal, best-effort executors for the task kinds named in §1: `http`,
//! `python` (subprocess), `postgres`, and `secrets` (env-var passthrough).
//! Their internals are not part of the conformance surface — only the
//! Executor Registry's dispatch contract is.
//! Kinds with no registered executor (`duckdb`, `snowflake`, `transfer`,
//! `playbook`, `workbook`, `iterator`, `save`) fail a lease with
//! `RegistryError::Unregistered`, which the worker reports the same way it
//! reports any other executor error: an `action_error` event and a
//! `POST /queue/{id}/fail`.

pub mod http;
pub mod postgres;
pub mod python;
pub mod secrets;

use std::sync::Arc;

use flowline_core::ExecutorRegistry;

pub fn build_registry(pg_pool: Option<Arc<sqlx::PgPool>>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(
        flowline_contracts::TaskKind::Http,
        Arc::new(http::HttpExecutor::new()),
    );
    registry.register(
        flowline_contracts::TaskKind::Python,
        Arc::new(python::PythonExecutor::new()),
    );
    registry.register(
        flowline_contracts::TaskKind::Secrets,
        Arc::new(secrets::SecretsExecutor::new()),
    );
    if let Some(pool) = pg_pool {
        registry.register(
            flowline_contracts::TaskKind::Postgres,
            Arc::new(postgres::PostgresExecutor::new(pool)),
        );
    }
    registry
}
