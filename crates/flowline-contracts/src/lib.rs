//! Wire contracts shared between `flowline-api` and `flowline-worker`.
//!
//! Event records, queue job DTOs, the playbook document shape, and the
//! worker-facing protocol bodies live here so both sides of the HTTP
//! boundary (and the in-process broker) compile against the same types.

pub mod catalog;
pub mod event;
pub mod playbook;
pub mod queue;

pub use catalog::{CatalogEntry, CatalogResourceRequest, CatalogResourceResponse};
pub use event::{Event, EventStatus, EventType, LoopMeta, NodeType};
pub use playbook::{
    LoopMode, LoopSpec, Playbook, RetryConfig, RetrySpec, Step, TaskKind, Transition,
    WorkbookEntry, WorkflowIndex,
};
pub use queue::{
    EnqueueRequest, FailRequest, HeartbeatRequest, JobStatus, LeaseRequest, LeaseResponse,
    PoolStatus, QueueJob, QueueSizeResponse,
};
