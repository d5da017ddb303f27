//! Persistence layer: the Event Log (C1) and Work Queue (C2).
//!
//! Both are exposed as traits so the broker and loop coordinator are
//! storage-agnostic; `memory` backs tests and the API's dev mode, `postgres`
//! backs production deployments. Both implementations share the derivation
//! and idempotency rules defined as free functions in `event_log`.

mod error;
mod event_log;
mod memory;
mod postgres;
mod work_queue;

pub use error::StoreError;
pub use event_log::{
    derive_event_fields, is_error_bearing, ChildCompletion, EventLog, IterationResult, NodeStatus,
};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use work_queue::{NackOutcome, WorkQueue};

/// Convenience bound for a backend implementing both halves of the store.
pub trait Store: EventLog + WorkQueue {}
impl<T: EventLog + WorkQueue> Store for T {}
