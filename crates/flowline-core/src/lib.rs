//! # flowline-core
//!
//! The orchestration engine for the Flowline workflow runtime: the event
//! log, the work queue, the catalog client, the renderer, the executor
//! registry, the retry controller, and the broker that ties them all
//! together.
//!
//! This crate has no HTTP surface of its own: `flowline-api` exposes it
//! over HTTP, and `flowline-worker` consumes the `Executor` /
//! `ExecutorRegistry` contract on the far side of the lease protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    EventDispatcher (C9)                       │
//! │        routes a persisted event to the Broker, if any        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Broker (C8)                            │
//! │   classifies execution state, evaluates transitions via the  │
//! │   Renderer, hands loop steps to the Loop Coordinator (C7)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              EventLog (C1)   +   WorkQueue (C2)               │
//! │        in-memory for tests/dev, PostgreSQL in production      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod reliability;
pub mod renderer;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::catalog::{CatalogClient, CatalogError, InMemoryCatalog};
    pub use crate::orchestrator::{
        build_context, Broker, BrokerConfig, BrokerError, EventDispatcher, LoopCompletion,
        LoopCoordinator,
    };
    pub use crate::persistence::{EventLog, InMemoryStore, PostgresStore, Store, StoreError, WorkQueue};
    pub use crate::registry::{ExecutionOutcome, Executor, ExecutorRegistry, RegistryError};
    pub use crate::reliability::{FailureOutcome, RetryController, RetryDecision};
    pub use crate::renderer::{RenderError, Renderer};
}

pub use catalog::{CatalogClient, CatalogError, InMemoryCatalog};
pub use orchestrator::{
    build_context, Broker, BrokerConfig, BrokerError, EventDispatcher, LoopCompletion,
    LoopCoordinator,
};
pub use persistence::{EventLog, InMemoryStore, PostgresStore, Store, StoreError, WorkQueue};
pub use registry::{ExecutionOutcome, Executor, ExecutorRegistry, RegistryError};
pub use reliability::{FailureOutcome, RetryController, RetryDecision};
pub use renderer::{RenderError, Renderer};
